//! HTTP surface over the broker.
//!
//! Every API route is a `POST` with a JSON body; any `GET` answers with a
//! plain liveness string so platform health checks succeed.

use std::sync::Arc;

use axum::extract::State;
use axum::handler::Handler;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get, post};
use axum::{Json, Router};
use pairlink::broker::{BeginOutcome, BroadcastReport, BrokerStats};
use pairlink::pairing::PairingOutcome;
use pairlink::registry::SessionSummary;
use pairlink::{Broker, BrokerError, UserId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::{CliError, Result};

pub const RUNNING_BANNER: &str = "pairlink is running";

pub type AppState = Arc<Broker>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginRequest {
	pub user_id: UserId,
	#[serde(default)]
	pub admin: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
	pub user_id: UserId,
	pub phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequest {
	pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorRequest {
	pub operator_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRequest {
	pub operator_id: UserId,
	pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
	pub operator_id: UserId,
	pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitResponse {
	CodeIssued {
		code: String,
	},
	Connected {
		#[serde(rename = "sessionId")]
		session_id: String,
	},
}

impl From<PairingOutcome> for SubmitResponse {
	fn from(outcome: PairingOutcome) -> Self {
		match outcome {
			PairingOutcome::CodeIssued { code } => SubmitResponse::CodeIssued { code },
			PairingOutcome::Connected { session_id } => SubmitResponse::Connected {
				session_id: session_id.to_string(),
			},
		}
	}
}

/// Maps broker denials onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(pub BrokerError);

impl From<BrokerError> for ApiError {
	fn from(err: BrokerError) -> Self {
		Self(err)
	}
}

impl ApiError {
	pub fn status(&self) -> StatusCode {
		match &self.0 {
			BrokerError::Banned | BrokerError::NotPrivileged | BrokerError::NotVerified => StatusCode::FORBIDDEN,
			BrokerError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
			BrokerError::NoPendingRequest | BrokerError::AlreadyGenerating => StatusCode::CONFLICT,
			BrokerError::InvalidPhone => StatusCode::UNPROCESSABLE_ENTITY,
			BrokerError::RequestTimedOut => StatusCode::GATEWAY_TIMEOUT,
			BrokerError::Pairing(_) => StatusCode::BAD_GATEWAY,
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		let body = Json(json!({ "error": self.0.code(), "message": self.0.to_string() }));
		(status, body).into_response()
	}
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn router(broker: AppState) -> Router {
	Router::new()
		.route("/api/pair/begin", api(begin))
		.route("/api/pair/submit", api(submit))
		.route("/api/verify", api(verify))
		.route("/api/disconnect", api(disconnect))
		.route("/api/admin/ban", api(ban))
		.route("/api/admin/unban", api(unban))
		.route("/api/admin/reset-quota", api(reset_quota))
		.route("/api/admin/sessions", api(sessions))
		.route("/api/admin/stats", api(stats))
		.route("/api/admin/broadcast", api(broadcast))
		.fallback(get(running))
		.with_state(broker)
}

/// Serves `router` on `listener` until `shutdown` resolves.
pub async fn serve(listener: TcpListener, router: Router, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
	if let Ok(addr) = listener.local_addr() {
		info!(target = "pairlink.http", %addr, "listening");
	}
	axum::serve(listener, router).with_graceful_shutdown(shutdown).await.map_err(CliError::Server)
}

fn api<H, T>(handler: H) -> MethodRouter<AppState>
where
	H: Handler<T, AppState>,
	T: 'static,
{
	post(handler).get(running)
}

async fn running() -> &'static str {
	RUNNING_BANNER
}

async fn begin(State(broker): State<AppState>, Json(request): Json<BeginRequest>) -> ApiResult<BeginOutcome> {
	Ok(Json(broker.begin_pairing(request.user_id, request.admin)?))
}

async fn submit(State(broker): State<AppState>, Json(request): Json<SubmitRequest>) -> ApiResult<SubmitResponse> {
	match broker.submit_phone(request.user_id, &request.phone).await {
		Ok(outcome) => Ok(Json(outcome.into())),
		Err(err) => {
			warn!(target = "pairlink.http", user = %request.user_id, error = %err, code = err.code(), "pairing request failed");
			Err(err.into())
		}
	}
}

async fn verify(State(broker): State<AppState>, Json(request): Json<UserRequest>) -> ApiResult<serde_json::Value> {
	let changed = broker.verify(request.user_id)?;
	Ok(Json(json!({ "verified": true, "changed": changed })))
}

async fn disconnect(State(broker): State<AppState>, Json(request): Json<UserRequest>) -> ApiResult<serde_json::Value> {
	let disconnected = broker.disconnect(request.user_id).await?;
	Ok(Json(json!({ "disconnected": disconnected })))
}

async fn ban(State(broker): State<AppState>, Json(request): Json<TargetRequest>) -> ApiResult<serde_json::Value> {
	let changed = broker.ban(request.operator_id, request.user_id).await?;
	info!(target = "pairlink.http", operator = %request.operator_id, user = %request.user_id, changed, "ban");
	Ok(Json(json!({ "changed": changed })))
}

async fn unban(State(broker): State<AppState>, Json(request): Json<TargetRequest>) -> ApiResult<serde_json::Value> {
	let changed = broker.unban(request.operator_id, request.user_id)?;
	Ok(Json(json!({ "changed": changed })))
}

async fn reset_quota(State(broker): State<AppState>, Json(request): Json<TargetRequest>) -> ApiResult<serde_json::Value> {
	broker.reset_quota(request.operator_id, request.user_id)?;
	Ok(Json(json!({ "reset": true })))
}

async fn sessions(State(broker): State<AppState>, Json(request): Json<OperatorRequest>) -> ApiResult<Vec<SessionSummary>> {
	Ok(Json(broker.list_sessions(request.operator_id)?))
}

async fn stats(State(broker): State<AppState>, Json(request): Json<OperatorRequest>) -> ApiResult<BrokerStats> {
	Ok(Json(broker.stats(request.operator_id)?))
}

async fn broadcast(State(broker): State<AppState>, Json(request): Json<BroadcastRequest>) -> ApiResult<BroadcastReport> {
	Ok(Json(broker.broadcast(request.operator_id, &request.text).await?))
}

#[cfg(test)]
mod tests {
	use super::*;
	use pairlink::pairing::{FailureKind, PairingFailure};

	#[test]
	fn denials_map_to_distinct_statuses() {
		assert_eq!(ApiError(BrokerError::RateLimited { max: 2 }).status(), StatusCode::TOO_MANY_REQUESTS);
		assert_eq!(ApiError(BrokerError::InvalidPhone).status(), StatusCode::UNPROCESSABLE_ENTITY);
		assert_eq!(ApiError(BrokerError::RequestTimedOut).status(), StatusCode::GATEWAY_TIMEOUT);
		assert_eq!(ApiError(BrokerError::NotVerified).status(), StatusCode::FORBIDDEN);
		assert_eq!(
			ApiError(BrokerError::Pairing(PairingFailure::new(FailureKind::Timeout, "slow"))).status(),
			StatusCode::BAD_GATEWAY
		);
	}

	#[test]
	fn submit_response_is_tagged() {
		let value = serde_json::to_value(SubmitResponse::CodeIssued { code: "ABCD1234".into() }).unwrap();
		assert_eq!(value, json!({ "status": "code_issued", "code": "ABCD1234" }));
	}
}
