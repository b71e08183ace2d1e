use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use quotewatch_core::checklist::{ChecklistRun, ChecklistRunner};
use quotewatch_core::domain::conversation::{AgentResponse, ConversationId, InboundMessage};
use quotewatch_core::errors::{ApplicationError, InterfaceError};
use quotewatch_core::escalation::engine::{EscalationEngine, EvaluationOutcome, ResolutionOutcome};
use quotewatch_db::repositories::ResponseRepository;
use quotewatch_db::{DbPool, SqlResponseRepository};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::sweep::{PendingQuotes, Source};

/// Shared handles behind every ingress route and the sweep.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<EscalationEngine>,
    pub checklist: Arc<ChecklistRunner>,
    pub responses: Arc<SqlResponseRepository>,
    pub pending: Arc<PendingQuotes>,
    pub db_pool: DbPool,
    clock: fn() -> DateTime<Utc>,
}

impl AppState {
    pub fn new(
        engine: Arc<EscalationEngine>,
        checklist: Arc<ChecklistRunner>,
        responses: Arc<SqlResponseRepository>,
        pending: Arc<PendingQuotes>,
        db_pool: DbPool,
    ) -> Self {
        Self { engine, checklist, responses, pending, db_pool, clock: Utc::now }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

#[derive(Debug, Deserialize)]
pub struct InboundMessageRequest {
    pub conversation_id: Option<String>,
    pub client_name: String,
    pub agent: String,
    pub text: String,
    pub quote_requested_at: String,
}

#[derive(Debug, Deserialize)]
pub struct AgentResponseRequest {
    pub conversation_id: Option<String>,
    pub client_name: Option<String>,
    pub agent: String,
    pub text: String,
    pub responded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ChecklistRequest {
    pub agent: String,
    pub client_name: Option<String>,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct Recorded {
    pub conversation_id: ConversationId,
    pub responded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

/// `InterfaceError` rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = match &self.0 {
            InterfaceError::BadRequest { message, .. }
            | InterfaceError::ServiceUnavailable { message, .. }
            | InterfaceError::Internal { message, .. } => message.clone(),
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            detail,
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn bad_request(message: impl Into<String>, correlation_id: &str) -> ApiError {
    ApiError(InterfaceError::BadRequest {
        message: message.into(),
        correlation_id: correlation_id.to_string(),
    })
}

fn require(field: &str, value: &str, correlation_id: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(bad_request(format!("`{field}` must not be empty"), correlation_id));
    }
    Ok(())
}

fn conversation_key(
    explicit: Option<&str>,
    client_name: Option<&str>,
    correlation_id: &str,
) -> Result<ConversationId, ApiError> {
    match (explicit.map(str::trim), client_name) {
        (Some(id), _) if !id.is_empty() => Ok(ConversationId(id.to_string())),
        (_, Some(name)) if !name.trim().is_empty() => Ok(ConversationId::from_client_name(name)),
        _ => Err(bad_request("`conversation_id` or `client_name` is required", correlation_id)),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/messages", post(receive_message))
        .route("/agent-responses", post(record_agent_response))
        .route("/conversations/{conversation_id}/resolve", post(resolve_conversation))
        .route("/conversations/{conversation_id}/checklist", post(run_checklist))
        .with_state(state)
}

pub async fn receive_message(
    State(state): State<AppState>,
    Json(request): Json<InboundMessageRequest>,
) -> Result<Json<EvaluationOutcome>, ApiError> {
    let correlation_id = correlation_id();
    require("client_name", &request.client_name, &correlation_id)?;
    require("agent", &request.agent, &correlation_id)?;
    let conversation_id = conversation_key(
        request.conversation_id.as_deref(),
        Some(&request.client_name),
        &correlation_id,
    )?;

    let message = InboundMessage {
        conversation_id,
        client_name: request.client_name,
        agent: request.agent,
        text: request.text,
        quote_requested_at: request.quote_requested_at,
    };

    let result = state.engine.evaluate(&message, state.now()).await;
    state.pending.track(&message, &result, Source::Ingress).await;

    match result {
        Ok(outcome) => {
            info!(
                event_name = "ingress.message.evaluated",
                correlation_id = %correlation_id,
                conversation_id = %message.conversation_id,
                agent = %message.agent,
                action = outcome.is_action(),
                "inbound message evaluated"
            );
            Ok(Json(outcome))
        }
        Err(error) => {
            warn!(
                event_name = "ingress.message.rejected",
                correlation_id = %correlation_id,
                conversation_id = %message.conversation_id,
                error = %error,
                "inbound message evaluation failed"
            );
            Err(ApiError(ApplicationError::from(error).into_interface(correlation_id)))
        }
    }
}

pub async fn record_agent_response(
    State(state): State<AppState>,
    Json(request): Json<AgentResponseRequest>,
) -> Result<(StatusCode, Json<Recorded>), ApiError> {
    let correlation_id = correlation_id();
    require("agent", &request.agent, &correlation_id)?;
    let conversation_id = conversation_key(
        request.conversation_id.as_deref(),
        request.client_name.as_deref(),
        &correlation_id,
    )?;

    let response = AgentResponse {
        conversation_id,
        agent: request.agent,
        text: request.text,
        responded_at: request.responded_at.unwrap_or_else(|| state.now()),
    };
    state.responses.record_response(&response).await.map_err(|error| {
        ApiError(ApplicationError::Persistence(error.to_string()).into_interface(&correlation_id))
    })?;

    info!(
        event_name = "ingress.agent_response.recorded",
        correlation_id = %correlation_id,
        conversation_id = %response.conversation_id,
        agent = %response.agent,
        "agent response recorded"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(Recorded {
            conversation_id: response.conversation_id,
            responded_at: response.responded_at,
        }),
    ))
}

pub async fn resolve_conversation(
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ResolutionOutcome>, ApiError> {
    let correlation_id = correlation_id();
    require("conversation_id", &conversation_id, &correlation_id)?;
    let conversation_id = ConversationId(conversation_id.trim().to_string());

    state.pending.forget(&conversation_id).await;
    let outcome = state.engine.resolve(&conversation_id).await.map_err(|error| {
        ApiError(ApplicationError::from(error).into_interface(&correlation_id))
    })?;
    Ok(Json(outcome))
}

pub async fn run_checklist(
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ChecklistRequest>,
) -> Result<Json<ChecklistRun>, ApiError> {
    let correlation_id = correlation_id();
    require("conversation_id", &conversation_id, &correlation_id)?;
    require("agent", &request.agent, &correlation_id)?;
    let conversation_id = ConversationId(conversation_id.trim().to_string());
    let client_name = request
        .client_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| conversation_id.to_string());

    let run = state
        .checklist
        .run(&conversation_id, &request.agent, &client_name, &request.text)
        .await;
    info!(
        event_name = "ingress.checklist.completed",
        correlation_id = %correlation_id,
        conversation_id = %conversation_id,
        agent = %request.agent,
        messages_sent = run.messages_sent,
        "checklist run finished"
    );
    Ok(Json(run))
}
