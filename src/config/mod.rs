//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "marginalia";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8787;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_GITHUB_ENDPOINT: &str = "https://api.github.com/graphql";
const DEFAULT_CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4/";
const DEFAULT_SHARED_TTL_SECS: u64 = 300;
const DEFAULT_USER_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_NOT_FOUND_TTL_SECS: u64 = 60;

/// Command-line arguments for the marginalia binary.
#[derive(Debug, Parser)]
#[command(
    name = "marginalia",
    version,
    about = "Caching edge proxy for page discussions"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MARGINALIA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP edge proxy.
    Serve(Box<ServeArgs>),
    /// Drop the shared cache entry of one thread.
    Purge(PurgeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    /// Page path of the thread, e.g. `/guide/intro`.
    #[arg(long, value_name = "PATH")]
    pub path: String,

    /// Discussion category of the thread.
    #[arg(long, value_name = "NAME")]
    pub category: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the discussion API endpoint.
    #[arg(long = "github-endpoint", value_name = "URL")]
    pub github_endpoint: Option<String>,

    /// Override the shared entry lifetime.
    #[arg(long = "cache-shared-ttl-seconds", value_name = "SECONDS")]
    pub cache_shared_ttl_seconds: Option<u64>,

    /// Override the per-user reaction entry lifetime.
    #[arg(long = "cache-user-ttl-seconds", value_name = "SECONDS")]
    pub cache_user_ttl_seconds: Option<u64>,

    /// Toggle same-turn fetch batching.
    #[arg(
        long = "cache-batching",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_batching: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub github: GithubSettings,
    pub cache: CacheSettings,
    pub cors: CorsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Clone)]
pub struct GithubSettings {
    pub endpoint: Url,
    pub owner: String,
    pub repo: String,
    /// Privileged token used for anonymous reads.
    pub fallback_token: Option<String>,
    pub user_agent: String,
}

impl std::fmt::Debug for GithubSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubSettings")
            .field("endpoint", &self.endpoint.as_str())
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("fallback_token", &self.fallback_token.as_ref().map(|_| "<redacted>"))
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    CloudflareKv,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub shared_ttl: Duration,
    pub user_ttl: Duration,
    pub not_found_ttl: Duration,
    pub populate_from_fallback: bool,
    pub batching: bool,
    pub cloudflare: Option<CloudflareSettings>,
}

#[derive(Clone)]
pub struct CloudflareSettings {
    pub api_base: Url,
    pub account_id: String,
    pub namespace_id: String,
    pub api_token: String,
}

impl std::fmt::Debug for CloudflareSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareSettings")
            .field("api_base", &self.api_base.as_str())
            .field("account_id", &self.account_id)
            .field("namespace_id", &self.namespace_id)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

/// Allowed browser origins; empty means any.
#[derive(Debug, Clone, Default)]
pub struct CorsSettings {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("MARGINALIA")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cors.allowed_origins")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Purge(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    github: RawGithubSettings,
    cache: RawCacheSettings,
    cors: RawCorsSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(endpoint) = overrides.github_endpoint.as_ref() {
            self.github.endpoint = Some(endpoint.clone());
        }
        if let Some(seconds) = overrides.cache_shared_ttl_seconds {
            self.cache.shared_ttl_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.cache_user_ttl_seconds {
            self.cache.user_ttl_seconds = Some(seconds);
        }
        if let Some(batching) = overrides.cache_batching {
            self.cache.batching = Some(batching);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            github,
            cache,
            cors,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            github: build_github_settings(github)?,
            cache: build_cache_settings(cache)?,
            cors: CorsSettings {
                allowed_origins: cors
                    .allowed_origins
                    .into_iter()
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect(),
            },
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_github_settings(github: RawGithubSettings) -> Result<GithubSettings, LoadError> {
    let endpoint = github
        .endpoint
        .unwrap_or_else(|| DEFAULT_GITHUB_ENDPOINT.to_string());
    let endpoint = Url::parse(endpoint.trim())
        .map_err(|err| LoadError::invalid("github.endpoint", err.to_string()))?;

    let owner = required(github.owner, "github.owner")?;
    let repo = required(github.repo, "github.repo")?;

    let user_agent = non_blank(github.user_agent)
        .unwrap_or_else(|| concat!("marginalia/", env!("CARGO_PKG_VERSION")).to_string());

    Ok(GithubSettings {
        endpoint,
        owner,
        repo,
        fallback_token: non_blank(github.fallback_token),
        user_agent,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("memory") => CacheBackend::Memory,
        Some("cloudflare_kv") => CacheBackend::CloudflareKv,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}` (expected memory|cloudflare_kv)"),
            ));
        }
    };

    let shared_ttl = positive_secs(
        cache.shared_ttl_seconds.unwrap_or(DEFAULT_SHARED_TTL_SECS),
        "cache.shared_ttl_seconds",
    )?;
    let user_ttl = positive_secs(
        cache.user_ttl_seconds.unwrap_or(DEFAULT_USER_TTL_SECS),
        "cache.user_ttl_seconds",
    )?;
    let not_found_ttl = positive_secs(
        cache.not_found_ttl_seconds.unwrap_or(DEFAULT_NOT_FOUND_TTL_SECS),
        "cache.not_found_ttl_seconds",
    )?;
    if not_found_ttl > shared_ttl {
        return Err(LoadError::invalid(
            "cache.not_found_ttl_seconds",
            "must not exceed cache.shared_ttl_seconds",
        ));
    }

    let cloudflare = match backend {
        CacheBackend::CloudflareKv => Some(build_cloudflare_settings(cache.cloudflare)?),
        CacheBackend::Memory => None,
    };

    Ok(CacheSettings {
        backend,
        shared_ttl,
        user_ttl,
        not_found_ttl,
        populate_from_fallback: cache.populate_from_fallback.unwrap_or(false),
        batching: cache.batching.unwrap_or(true),
        cloudflare,
    })
}

fn build_cloudflare_settings(raw: RawCloudflareSettings) -> Result<CloudflareSettings, LoadError> {
    let api_base = raw
        .api_base
        .unwrap_or_else(|| DEFAULT_CLOUDFLARE_API_BASE.to_string());
    let api_base = Url::parse(api_base.trim())
        .map_err(|err| LoadError::invalid("cache.cloudflare.api_base", err.to_string()))?;

    Ok(CloudflareSettings {
        api_base,
        account_id: required(raw.account_id, "cache.cloudflare.account_id")?,
        namespace_id: required(raw.namespace_id, "cache.cloudflare.namespace_id")?,
        api_token: required(raw.api_token, "cache.cloudflare.api_token")?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGithubSettings {
    endpoint: Option<String>,
    owner: Option<String>,
    repo: Option<String>,
    fallback_token: Option<String>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    shared_ttl_seconds: Option<u64>,
    user_ttl_seconds: Option<u64>,
    not_found_ttl_seconds: Option<u64>,
    populate_from_fallback: Option<bool>,
    batching: Option<bool>,
    cloudflare: RawCloudflareSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCloudflareSettings {
    api_base: Option<String>,
    account_id: Option<String>,
    namespace_id: Option<String>,
    api_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCorsSettings {
    allowed_origins: Vec<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn required(value: Option<String>, key: &'static str) -> Result<String, LoadError> {
    non_blank(value).ok_or_else(|| LoadError::invalid(key, "must be set"))
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}
