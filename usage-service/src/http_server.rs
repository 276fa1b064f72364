use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use usage_client::domain::DailyAggregate;

use crate::sensor::{DeviceInfo, SensorSet, SensorState};

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global Prometheus recorder. Safe to call more than once.
pub fn install_metrics_recorder() -> anyhow::Result<()> {
    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus metrics recorder: {e}"))?;

    // Ignore error if the handle was already set; this should only be called once.
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

pub fn router(sensors: Arc<SensorSet>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/api/sensors", get(list_sensors))
        .route("/api/sensors/:key", get(get_sensor))
        .route("/api/aggregate", get(get_aggregate))
        .route("/api/device", get(get_device))
        .with_state(sensors)
}

/// Serve metrics and sensor states on `bind_addr` in a background task.
pub fn spawn(bind_addr: &str, sensors: Arc<SensorSet>) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid http.bind_addr '{bind_addr}': {e}"))?;
    let app = router(sensors);

    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!(%addr, "http server listening");
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    tracing::error!(error = %e, "http server error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to bind http listener");
            }
        }
    });

    Ok(())
}

async fn metrics_handler() -> String {
    PROM_HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

async fn list_sensors(State(sensors): State<Arc<SensorSet>>) -> Json<Vec<SensorState>> {
    Json(sensors.states())
}

async fn get_sensor(
    State(sensors): State<Arc<SensorSet>>,
    Path(key): Path<String>,
) -> Result<Json<SensorState>, StatusCode> {
    sensors.state(&key).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn get_aggregate(State(sensors): State<Arc<SensorSet>>) -> Json<Option<DailyAggregate>> {
    Json(sensors.aggregate())
}

async fn get_device(State(sensors): State<Arc<SensorSet>>) -> Json<DeviceInfo> {
    Json(sensors.device.clone())
}
