use std::{process, sync::Arc};

use marginalia::{
    application::{
        batch::FetchBatcher, coordinator::RequestCoordinator, discussions::DiscussionService,
        error::AppError, remote::DiscussionApi,
    },
    cache::{
        CacheConfig, CacheMutator, Clock, KvStore, MemoryKv, SharedCache, SystemClock,
        UserReactionOverlay,
    },
    config::{self, CacheBackend},
    domain::{credential::Credential, thread::ThreadKey},
    infra::{
        cloudflare_kv::CloudflareKv,
        error::InfraError,
        github::GithubClient,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::sync::oneshot;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Purge(args) => run_purge(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let kv = build_kv(&settings, Arc::clone(&clock))?;
    let cache_config = CacheConfig::from(&settings.cache);

    let api: Arc<dyn DiscussionApi> =
        Arc::new(GithubClient::new(&settings.github).map_err(AppError::from)?);
    let fallback = settings
        .github
        .fallback_token
        .as_deref()
        .and_then(Credential::new);
    if fallback.is_none() {
        warn!("No fallback token configured; anonymous misses will be served as empty threads");
    }

    let shared = SharedCache::new(Arc::clone(&kv), Arc::clone(&clock), cache_config.clone());
    let overlay = Arc::new(UserReactionOverlay::new(
        kv,
        clock,
        Arc::clone(&api),
        cache_config.clone(),
    ));
    let batcher = Arc::new(FetchBatcher::new(Arc::clone(&api), cache_config.batching));
    let coordinator = Arc::new(RequestCoordinator::new(
        shared.clone(),
        Arc::clone(&overlay),
        batcher,
        fallback,
    ));
    let mutator = CacheMutator::new(shared, overlay);
    let discussions = Arc::new(DiscussionService::new(api, coordinator, mutator));

    serve_http(&settings, HttpState::new(discussions)).await
}

async fn run_purge(settings: config::Settings, args: config::PurgeArgs) -> Result<(), AppError> {
    let thread = ThreadKey::new(&args.path, &args.category)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let kv = build_kv(&settings, Arc::clone(&clock))?;
    let shared = SharedCache::new(kv, clock, CacheConfig::from(&settings.cache));

    let purged = shared.purge(&thread).await?;
    info!(thread = %thread, purged, "Shared cache entry purge finished");
    Ok(())
}

fn build_kv(
    settings: &config::Settings,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn KvStore>, AppError> {
    match settings.cache.backend {
        CacheBackend::Memory => Ok(Arc::new(MemoryKv::new(clock))),
        CacheBackend::CloudflareKv => {
            let cloudflare = settings.cache.cloudflare.as_ref().ok_or_else(|| {
                AppError::from(InfraError::configuration(
                    "cache.cloudflare settings are required for the cloudflare_kv backend",
                ))
            })?;
            let store = CloudflareKv::new(cloudflare, &settings.github.user_agent)?;
            Ok(Arc::new(store))
        }
    }
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state, &settings.cors);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "Listening");

    let (stop, stopped) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = stopped.await;
            })
            .await
    });

    tokio::select! {
        joined = &mut server => return server_outcome(joined),
        () = shutdown_signal() => {}
    }

    let _ = stop.send(());
    let grace = settings.server.graceful_shutdown;
    match tokio::time::timeout(grace, server).await {
        Ok(joined) => server_outcome(joined),
        Err(_) => {
            warn!(
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}

fn server_outcome(
    joined: Result<Result<(), std::io::Error>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    joined
        .map_err(|err| AppError::unexpected(format!("server task failed: {err}")))?
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(err) => {
            warn!(error = %err, "Cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
