use axum::Json;
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use marginalia_api_types::{
    DiscussionPayload, NewCommentRequest, NewReplyRequest, ReactionContent, ReactionRequest,
};
use serde::Deserialize;
use tracing::warn;

use crate::application::coordinator::{CacheStatus, ThreadView};
use crate::application::discussions::{PurgeRequest, WriteError};
use crate::domain::credential::Credential;
use crate::domain::thread::ThreadKey;

use super::error::ApiError;
use super::state::HttpState;

pub const X_CACHE: &str = "x-cache";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ThreadQuery {
    pub path: Option<String>,
    pub category: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PurgeQuery {
    pub path: Option<String>,
    pub category: Option<String>,
    pub user_only: Option<bool>,
    pub subject_id: Option<String>,
    pub reaction: Option<String>,
    pub delta: Option<i64>,
}

pub async fn get_discussions(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Query(query): Query<ThreadQuery>,
) -> Result<Response, ApiError> {
    let thread = thread_key(query.path.as_deref(), query.category.as_deref())?;
    let viewer = viewer_credential(&headers);
    let known_id = query.id.as_deref().map(str::trim).filter(|id| !id.is_empty());

    let view = state
        .discussions
        .load(&thread, known_id, viewer.as_ref())
        .await;
    Ok(thread_response(view))
}

pub async fn purge_cache(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Query(query): Query<PurgeQuery>,
) -> Result<Json<marginalia_api_types::PurgeOutcome>, ApiError> {
    let credential = viewer_credential(&headers).ok_or_else(ApiError::unauthorized)?;
    let thread = thread_key(query.path.as_deref(), query.category.as_deref())?;
    let request = purge_request(&query)?;

    let outcome = state
        .discussions
        .purge(&thread, Some(&credential), request)
        .await
        .map_err(|err| {
            warn!(thread = %thread, error = %err, "Cache purge failed");
            ApiError::cache_unavailable(err.to_string())
        })?;
    Ok(Json(outcome))
}

pub async fn post_comment(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(request): Json<NewCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let credential = viewer_credential(&headers).ok_or_else(ApiError::unauthorized)?;
    let thread = thread_key(Some(&request.path), Some(&request.category))?;

    let comment = state
        .discussions
        .add_comment(
            &credential,
            &thread,
            &request.body,
            request.discussion_id.as_deref(),
            request.intro.as_deref(),
        )
        .await
        .map_err(write_to_api)?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn post_reply(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(request): Json<NewReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let credential = viewer_credential(&headers).ok_or_else(ApiError::unauthorized)?;
    let thread = thread_key(Some(&request.path), Some(&request.category))?;

    let reply = state
        .discussions
        .add_reply(
            &credential,
            &thread,
            &request.discussion_id,
            &request.parent_id,
            &request.body,
        )
        .await
        .map_err(write_to_api)?;
    Ok((StatusCode::CREATED, Json(reply)))
}

pub async fn post_reaction(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(request): Json<ReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let credential = viewer_credential(&headers).ok_or_else(ApiError::unauthorized)?;
    let thread = thread_key(Some(&request.path), Some(&request.category))?;

    let response = state
        .discussions
        .react(
            &credential,
            &thread,
            &request.subject_id,
            request.reaction,
            request.action,
        )
        .await
        .map_err(write_to_api)?;
    Ok(Json(response))
}

pub async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn thread_response(view: ThreadView) -> Response {
    let cache = HeaderValue::from_static(view.cache.as_str());

    // An unreachable upstream reads as "no discussion yet".
    let Some(payload) = view.payload else {
        let mut response = Json(DiscussionPayload::empty()).into_response();
        response.headers_mut().insert(X_CACHE, cache);
        set_cache_control(&mut response, "no-store");
        return response;
    };

    let mut response = Json(payload).into_response();
    response.headers_mut().insert(X_CACHE, cache);

    match (view.personalized, view.max_age) {
        (true, _) => set_cache_control(&mut response, "private, no-store"),
        (false, Some(max_age)) if view.cache != CacheStatus::Bypass => {
            let value = format!("public, max-age={}", max_age.as_secs());
            set_cache_control(&mut response, &value);
        }
        (false, _) => set_cache_control(&mut response, "no-store"),
    }
    response
}

fn set_cache_control(response: &mut Response, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(CACHE_CONTROL, value);
    }
}

/// Bearer credential from the `Authorization` header; malformed values count as anonymous.
fn viewer_credential(headers: &HeaderMap) -> Option<Credential> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    Credential::from_authorization(raw)
}

fn thread_key(path: Option<&str>, category: Option<&str>) -> Result<ThreadKey, ApiError> {
    let (Some(path), Some(category)) = (path, category) else {
        return Err(ApiError::bad_request(
            "Missing thread parameters",
            Some("`path` and `category` are required".to_string()),
        ));
    };
    ThreadKey::new(path, category).map_err(|err| ApiError::invalid_input(err.to_string()))
}

fn purge_request(query: &PurgeQuery) -> Result<PurgeRequest, ApiError> {
    match (&query.subject_id, &query.reaction, query.delta) {
        (None, None, None) if query.user_only.unwrap_or(false) => Ok(PurgeRequest::UserOnly),
        (None, None, None) => Ok(PurgeRequest::Full),
        (Some(subject_id), Some(reaction), Some(delta)) if !subject_id.trim().is_empty() => {
            let kind = reaction
                .parse::<ReactionContent>()
                .map_err(|err| ApiError::invalid_input(err.to_string()))?;
            Ok(PurgeRequest::Patch {
                subject_id: subject_id.trim().to_string(),
                kind,
                delta,
            })
        }
        _ => Err(ApiError::bad_request(
            "Incomplete patch parameters",
            Some("`subject_id`, `reaction` and `delta` must be given together".to_string()),
        )),
    }
}

fn write_to_api(err: WriteError) -> ApiError {
    match err {
        WriteError::Validation(err) => ApiError::invalid_input(err.to_string()),
        WriteError::Upstream { operation } => ApiError::upstream_failed(operation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(subject_id: Option<&str>, reaction: Option<&str>, delta: Option<i64>) -> PurgeQuery {
        PurgeQuery {
            path: Some("/ch01".to_string()),
            category: Some("Notes".to_string()),
            user_only: None,
            subject_id: subject_id.map(str::to_string),
            reaction: reaction.map(str::to_string),
            delta,
        }
    }

    #[test]
    fn purge_request_variants() {
        assert_eq!(purge_request(&query(None, None, None)).expect("full"), PurgeRequest::Full);

        let mut user_only = query(None, None, None);
        user_only.user_only = Some(true);
        assert_eq!(purge_request(&user_only).expect("user"), PurgeRequest::UserOnly);

        assert_eq!(
            purge_request(&query(Some("C1"), Some("thumbs_up"), Some(-1))).expect("patch"),
            PurgeRequest::Patch {
                subject_id: "C1".to_string(),
                kind: ReactionContent::ThumbsUp,
                delta: -1,
            }
        );
    }

    #[test]
    fn partial_or_unknown_patch_is_rejected() {
        let partial = purge_request(&query(Some("C1"), None, Some(1))).expect_err("partial");
        assert_eq!(partial.status(), StatusCode::BAD_REQUEST);

        let unknown = purge_request(&query(Some("C1"), Some("SHRUG"), Some(1))).expect_err("kind");
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn viewer_credential_ignores_malformed_headers() {
        let mut headers = HeaderMap::new();
        assert!(viewer_credential(&headers).is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(viewer_credential(&headers).is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer gho_x"));
        assert_eq!(
            viewer_credential(&headers).map(|c| c.secret().to_string()),
            Some("gho_x".to_string())
        );
    }
}
