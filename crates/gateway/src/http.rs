use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sheetdesk_auth::Authorizer;
use sheetdesk_contracts::{AuthReply, LookupReply};
use sheetdesk_lookup::LookupEngine;
use sheetdesk_store::{SheetsStore, SheetsStoreConfig, TableStore};
use tracing::Instrument;
use ulid::Ulid;

use crate::config::{GatewayConfig, StartupError};
use crate::rate_limit::RateLimiter;
use crate::service::Service;

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub service: Service,
    rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: GatewayConfig, service: Service) -> Self {
        let rate_limiter = RateLimiter::new(
            Duration::from_secs(config.rate_limit_window_secs.max(1)),
            16_384,
        );
        Self {
            config,
            service,
            rate_limiter,
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: GatewayConfig) -> Result<Router, StartupError> {
    let store: Arc<dyn TableStore> = Arc::new(
        SheetsStore::new(SheetsStoreConfig {
            base_url: config.sheets_base_url.clone(),
            spreadsheet_id: config.spreadsheet_id.clone(),
            bearer_token: config.sheets_token.clone(),
            timeout: config.store_timeout(),
            retry_max_attempts: config.store_retry_max_attempts,
            retry_base_backoff: config.store_retry_base_backoff(),
        })
        .map_err(|err| StartupError {
            code: "ERR_STORE_UNAVAILABLE",
            message: format!("failed to initialize store client: {}", err),
        })?,
    );

    let authorizer = Authorizer::new(
        store.clone(),
        config.auth_log_table.clone(),
        config.access_codes.clone(),
    );
    let lookup = LookupEngine::new(
        store,
        config.records_table.clone(),
        config.lookup_fields.clone(),
    );
    let service = Service::new(authorizer, lookup);

    // A cold cache is not fatal: misses fall back to the read-through path.
    match service.preload().await {
        Ok(entries) => tracing::info!(entries, "auth cache preloaded"),
        Err(err) => tracing::warn!(error = %err, "auth cache preload failed, starting cold"),
    }

    Ok(router_with_state(AppState::new(config, service)))
}

pub fn router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/v1/auth", post(authenticate))
        .route("/v1/lookup", post(lookup))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuthRequest {
    identity: String,
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LookupRequest {
    identity: String,
    query: String,
}

async fn authenticate(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<Json<AuthReply>, ApiError> {
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let result = async {
        let Json(req) = req.map_err(|_| invalid_params("invalid JSON body"))?;
        let identity = validated_identity(&req.identity)?;
        let code = req.code.trim();
        if code.is_empty() {
            return Err(invalid_params("code must be non-empty"));
        }

        if !state.rate_limiter.allow(
            format!("auth:{}", identity).as_str(),
            state.config.rate_limit_per_window,
        ) {
            return Err(json_error(
                StatusCode::TOO_MANY_REQUESTS,
                "ERR_RATE_LIMITED",
                "rate limit exceeded for authentication".to_string(),
                true,
            ));
        }

        let span = tracing::info_span!(
            "auth.authenticate",
            request_id = %request_id,
            identity = %identity,
            outcome = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        );

        let reply = async {
            let started = Instant::now();
            let reply = state.service.handle_authenticate(&identity, code).await;
            let outcome = auth_outcome_label(&reply);
            tracing::Span::current().record("latency_ms", started.elapsed().as_millis() as u64);
            tracing::Span::current().record("outcome", outcome);
            crate::metrics::observe_auth_outcome(outcome);
            reply
        }
        .instrument(span)
        .await;

        match reply {
            AuthReply::Granted { .. } => Ok(Json(reply)),
            AuthReply::Rejected => Err(json_error(
                StatusCode::FORBIDDEN,
                "ERR_INVALID_CODE",
                "invalid access code".to_string(),
                false,
            )),
            AuthReply::StoreRateLimited => Err(store_rate_limited_error()),
            AuthReply::StoreUnavailable => Err(store_unavailable_error()),
        }
    }
    .await;

    observe("/v1/auth", &result, started);
    result
}

async fn lookup(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<LookupRequest>, JsonRejection>,
) -> Result<Json<LookupReply>, ApiError> {
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let result = async {
        let Json(req) = req.map_err(|_| invalid_params("invalid JSON body"))?;
        let identity = validated_identity(&req.identity)?;
        let query = req.query.trim();
        if query.is_empty() {
            return Err(invalid_params("query must be non-empty"));
        }

        if !state.rate_limiter.allow(
            format!("lookup:{}", identity).as_str(),
            state.config.rate_limit_per_window,
        ) {
            return Err(json_error(
                StatusCode::TOO_MANY_REQUESTS,
                "ERR_RATE_LIMITED",
                "rate limit exceeded for lookup".to_string(),
                true,
            ));
        }

        let span = tracing::info_span!(
            "lookup.search",
            request_id = %request_id,
            identity = %identity,
            outcome = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        );

        let reply = async {
            let started = Instant::now();
            let reply = state.service.handle_lookup(&identity, query).await;
            let outcome = lookup_outcome_label(&reply);
            tracing::Span::current().record("latency_ms", started.elapsed().as_millis() as u64);
            tracing::Span::current().record("outcome", outcome);
            crate::metrics::observe_lookup_outcome(outcome);
            reply
        }
        .instrument(span)
        .await;

        match reply {
            LookupReply::Matches { .. } => Ok(Json(reply)),
            LookupReply::Unauthorized => Err(json_error(
                StatusCode::FORBIDDEN,
                "ERR_UNAUTHORIZED",
                "not authorized; authenticate first".to_string(),
                false,
            )),
            LookupReply::StoreRateLimited => Err(store_rate_limited_error()),
            LookupReply::StoreUnavailable => Err(store_unavailable_error()),
        }
    }
    .await;

    observe("/v1/lookup", &result, started);
    result
}

fn observe<T>(route: &str, result: &Result<Json<T>, ApiError>, started: Instant) {
    let status = match result {
        Ok(_) => StatusCode::OK,
        Err((status, _)) => *status,
    };
    crate::metrics::observe_http_request(route, "POST", status.as_u16(), started.elapsed());
}

fn auth_outcome_label(reply: &AuthReply) -> &'static str {
    match reply {
        AuthReply::Granted { .. } => "granted",
        AuthReply::Rejected => "rejected",
        AuthReply::StoreRateLimited => "store_rate_limited",
        AuthReply::StoreUnavailable => "store_unavailable",
    }
}

fn lookup_outcome_label(reply: &LookupReply) -> &'static str {
    match reply {
        LookupReply::Matches { .. } => "matches",
        LookupReply::Unauthorized => "unauthorized",
        LookupReply::StoreRateLimited => "store_rate_limited",
        LookupReply::StoreUnavailable => "store_unavailable",
    }
}

fn validated_identity(raw: &str) -> Result<String, ApiError> {
    let identity = raw.trim();
    if identity.is_empty() {
        return Err(invalid_params("identity must be non-empty"));
    }
    Ok(identity.to_string())
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
            retryable,
        }),
    )
}

fn invalid_params(message: &str) -> ApiError {
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_PARAMS",
        message.to_string(),
        false,
    )
}

fn store_rate_limited_error() -> ApiError {
    json_error(
        StatusCode::TOO_MANY_REQUESTS,
        "ERR_STORE_RATE_LIMITED",
        "record store is rate limiting requests, try again shortly".to_string(),
        true,
    )
}

fn store_unavailable_error() -> ApiError {
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "ERR_STORE_UNAVAILABLE",
        "record store unavailable".to_string(),
        true,
    )
}
