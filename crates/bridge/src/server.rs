//! Inbound HTTP endpoint.
//!
//! `GET /{task_manager_id}/{session_id}` starts a session for that key;
//! `GET /sessions` lists the running ones.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::session::{
    ProcessSpawner, Reservation, Session, SessionError, SessionKey, SessionRegistry,
    SessionSettings,
};
use crate::transport::{Dialer, RelayEndpoint};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub dialer: Arc<dyn Dialer>,
    pub relay: Arc<RelayEndpoint>,
    pub settings: SessionSettings,
    /// Root token; every session is cancelled with it.
    pub shutdown: CancellationToken,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/{task_manager_id}/{session_id}", get(open_session))
        .with_state(state)
}

/// Serves until the shutdown token is cancelled.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// `GET /sessions`
async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list())
}

/// `GET /{task_manager_id}/{session_id}`: spawn a shell and attach it to
/// the relay.
async fn open_session(
    Path((task_manager_id, session_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let key = SessionKey::new(task_manager_id, session_id);
    let reservation = match state.registry.reserve(&key) {
        Ok(reservation) => reservation,
        Err(e) => {
            warn!(session = %key, "Rejected duplicate session request");
            return error_response(&e);
        }
    };

    // Establishment outlives this handler: a client that disconnects midway
    // must neither orphan the process nor leave the key reserved.
    let establishing = tokio::spawn(establish(state, reservation));
    match establishing.await {
        Ok(Ok(())) => (StatusCode::OK, "attached").into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(e) => {
            error!(session = %key, error = %e, "Session establishment panicked");
            (StatusCode::INTERNAL_SERVER_ERROR, "establishment failed").into_response()
        }
    }
}

/// Establishes the reserved session and hands it to a supervisor. On error
/// the reservation is dropped, which frees the key.
async fn establish(state: AppState, reservation: Reservation) -> Result<(), SessionError> {
    let key = reservation.key().clone();
    let session = Session::establish(
        key.clone(),
        state.settings.clone(),
        state.spawner.as_ref(),
        state.dialer.as_ref(),
        &state.relay,
        &state.shutdown,
    )
    .await
    .map_err(|e| {
        warn!(session = %key, error = %e, "Session establishment failed");
        e
    })?;

    reservation.activate(session.handle());
    tokio::spawn(supervise(Arc::clone(&state.registry), session));
    Ok(())
}

/// Runs a session to completion and unregisters it.
async fn supervise(registry: Arc<SessionRegistry>, session: Session) {
    let outcome = session.run().await;
    registry.remove(&outcome.key);

    if !outcome.reason.is_clean() {
        warn!(
            session = %outcome.key,
            reason = %outcome.reason,
            "Session ended with an error"
        );
    }
    info!(active = registry.count(), "Session unregistered");
}

fn status_for(error: &SessionError) -> StatusCode {
    match error {
        SessionError::SpawnFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SessionError::DialFailed { .. } => StatusCode::BAD_GATEWAY,
        SessionError::AlreadyActive(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &SessionError) -> Response {
    (status_for(error), error.to_string()).into_response()
}
