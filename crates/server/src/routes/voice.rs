//! Voice session endpoints
//!
//! The engine owns session identity, routing and metric accounting;
//! speech processing happens on the external realtime provider.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use sitevoice_core::{Error, StatsReportable};
use sitevoice_voice::{
    AudioConfig, InputOutcome, VoiceInput, VoiceSessionConfig, VoiceSessionStatus,
};

use crate::error::ApiError;
use crate::extract::{locale_override, query_param, ApiJson, Meta, Tenant};
use crate::metrics::record_voice_session;
use crate::state::AppState;

/// `POST /api/v1/voice/session` body
#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub site_id: Uuid,
    pub user_id: Option<String>,
    pub locale: Option<String>,
    pub max_duration_secs: Option<u64>,
    #[serde(default)]
    pub audio: AudioConfig,
}

/// `POST /api/v1/voice/session`
pub async fn create_session(
    State(state): State<AppState>,
    tenant: Tenant,
    headers: axum::http::HeaderMap,
    ApiJson(body): ApiJson<CreateSessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let fail = |error: Error| {
        ApiError::new(error)
            .with_correlation(tenant.meta.correlation.clone())
            .with_tenant(tenant.scope.tenant_id())
            .with_instance(tenant.meta.path.clone())
    };

    let accept_language = headers.get("accept-language").and_then(|v| v.to_str().ok());
    let override_locale = body
        .locale
        .clone()
        .or_else(|| locale_override(&headers, None));
    let locale = state
        .locales
        .negotiate(accept_language, override_locale.as_deref());

    let view = state
        .voice
        .create(VoiceSessionConfig {
            tenant_id: tenant.scope.tenant_id(),
            site_id: body.site_id,
            user_id: body.user_id,
            locale: locale.clone(),
            max_duration_secs: body
                .max_duration_secs
                .unwrap_or(state.settings.voice.default_duration_secs),
            audio: body.audio,
        })
        .map_err(|e| fail(e.into()))?;

    record_voice_session("created");

    let expires_in = (view.expires_at - view.created_at).num_seconds();
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "sessionId": view.id,
            "ttsLocale": locale,
            "sttLocale": locale,
            "expiresIn": expires_in,
            "expiresAt": view.expires_at,
            "endpoints": {
                "websocket": serde_json::Value::Null,
                "sse": format!("/api/v1/voice/stream?session_id={}&format=sse", view.id),
            }
        })),
    ))
}

/// `GET /api/v1/voice/stream?session_id=&format=sse`
///
/// Emits `ready` on open, `heartbeat` on the configured interval and a
/// `state` event whenever the session status changes; the stream closes
/// once the session reaches a terminal state.
pub async fn stream_sse(
    State(state): State<AppState>,
    tenant: Tenant,
    uri: axum::http::Uri,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let fail = |error: Error| {
        ApiError::new(error)
            .with_correlation(tenant.meta.correlation.clone())
            .with_tenant(tenant.scope.tenant_id())
            .with_instance(tenant.meta.path.clone())
    };

    let session_id = query_param(uri.query(), "session_id")
        .and_then(|raw| Uuid::parse_str(&raw).ok())
        .ok_or_else(|| fail(Error::Validation("session_id query parameter is required".to_string())))?;

    let tenant_id = tenant.scope.tenant_id();
    // Ownership is checked before the stream starts.
    let initial = state
        .voice
        .get(session_id, tenant_id)
        .map_err(|e| fail(e.into()))?;

    let registry = state.voice.clone();
    let heartbeat = Duration::from_secs(state.settings.voice.heartbeat_secs.max(1));

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ready").data(
            json!({ "sessionId": session_id, "status": initial.status }).to_string(),
        ));

        let mut last_status = initial.status;
        let mut heartbeat_timer = tokio::time::interval(heartbeat);
        heartbeat_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        heartbeat_timer.tick().await; // first tick fires immediately
        let mut poll_timer = tokio::time::interval(Duration::from_millis(500));

        loop {
            tokio::select! {
                _ = heartbeat_timer.tick() => {
                    yield Ok(Event::default().event("heartbeat").data(
                        json!({ "sessionId": session_id }).to_string(),
                    ));
                }
                _ = poll_timer.tick() => {
                    match registry.get(session_id, tenant_id) {
                        Ok(view) => {
                            if view.status != last_status {
                                last_status = view.status;
                                yield Ok(Event::default().event("state").data(
                                    json!({
                                        "sessionId": session_id,
                                        "status": view.status,
                                    }).to_string(),
                                ));
                            }
                            if view.status.is_terminal() {
                                break;
                            }
                        },
                        Err(_) => break,
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream))
}

/// `POST /api/v1/voice/stream` body
#[derive(Debug, Deserialize)]
pub struct StreamInputBody {
    pub session_id: Uuid,
    pub input: Option<String>,
    pub audio_data: Option<Vec<u8>>,
    pub input_type: Option<String>,
}

/// `POST /api/v1/voice/stream`
pub async fn stream_input(
    State(state): State<AppState>,
    tenant: Tenant,
    ApiJson(body): ApiJson<StreamInputBody>,
) -> Result<impl IntoResponse, ApiError> {
    let fail = |error: Error| {
        ApiError::new(error)
            .with_correlation(tenant.meta.correlation.clone())
            .with_tenant(tenant.scope.tenant_id())
            .with_instance(tenant.meta.path.clone())
    };

    let input = match (body.input, body.audio_data, body.input_type.as_deref()) {
        (Some(text), _, None | Some("text")) => VoiceInput::Text(text),
        (_, Some(audio), None | Some("audio")) => VoiceInput::Audio(audio),
        _ => {
            return Err(fail(Error::Validation(
                "either input (text) or audio_data must be provided".to_string(),
            )))
        },
    };

    let outcome = state
        .voice
        .process_input(body.session_id, tenant.scope.tenant_id(), input)
        .await
        .map_err(|e| fail(e.into()))?;

    let payload = match outcome {
        InputOutcome::Sent => json!({ "sessionId": body.session_id, "status": "sent" }),
        InputOutcome::Queued { depth } => {
            json!({ "sessionId": body.session_id, "status": "queued", "queueDepth": depth })
        },
    };
    Ok(Json(payload))
}

/// `DELETE /api/v1/voice/session/:id`
pub async fn end_session(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let fail = |error: Error| {
        ApiError::new(error)
            .with_correlation(tenant.meta.correlation.clone())
            .with_tenant(tenant.scope.tenant_id())
            .with_instance(tenant.meta.path.clone())
    };

    let view = state
        .voice
        .end(session_id, tenant.scope.tenant_id())
        .map_err(|e| fail(e.into()))?;

    record_voice_session("ended");

    Ok(Json(json!({
        "sessionId": view.id,
        "status": VoiceSessionStatus::Ended,
        "endedAt": view.ended_at,
        "turns": view.metrics.total_turns,
    })))
}

/// `GET /api/v1/voice/health`
pub async fn health(State(state): State<AppState>, _meta: Meta) -> impl IntoResponse {
    let registry: &dyn StatsReportable = state.voice.as_ref();
    let sessions = registry.stats_snapshot().await;
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "sessions": sessions,
        })),
    )
}
