use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use botfleet_core::sessions::LiveSessions;
use botfleet_core::tasks::TaskRegistry;
use botfleet_db::{ping, DbPool};

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
    pub sessions: Arc<LiveSessions>,
    pub registry: Arc<TaskRegistry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub running_sessions: usize,
    pub in_flight_tasks: usize,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let service = service_check(&state.registry);
    let ready = database.status == "ready" && service.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service,
        database,
        running_sessions: state.sessions.running_count(),
        in_flight_tasks: state.registry.in_flight_count(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn service_check(registry: &TaskRegistry) -> HealthCheck {
    if registry.is_shutting_down() {
        HealthCheck { status: "degraded", detail: "task registry is shutting down".to_string() }
    } else {
        HealthCheck { status: "ready", detail: "botfleet-server runtime initialized".to_string() }
    }
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use botfleet_core::limits::RequesterLimits;
    use botfleet_core::sessions::LiveSessions;
    use botfleet_core::tasks::TaskRegistry;
    use botfleet_db::{connect_with_settings, DbPool};

    use crate::health::{health, HealthState};

    fn state(db_pool: DbPool) -> HealthState {
        HealthState {
            db_pool,
            sessions: Arc::new(LiveSessions::new()),
            registry: TaskRegistry::new(Arc::new(RequesterLimits::default())),
        }
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");

        let (status, Json(payload)) = health(State(state(pool.clone()))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.service.status, "ready");
        assert_eq!(payload.running_sessions, 0);
        assert_eq!(payload.in_flight_tasks, 0);

        let body = serde_json::to_value(&payload).expect("payload serializes");
        assert_eq!(body["database"]["status"], "ready");
        assert_eq!(body["running_sessions"], 0);

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(State(state(pool))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn health_degrades_once_tasks_are_draining() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");
        let state = state(pool.clone());
        state.registry.shutdown().await;

        let (status, Json(payload)) = health(State(state)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.service.status, "degraded");
        assert_eq!(payload.database.status, "ready");

        pool.close().await;
    }
}
