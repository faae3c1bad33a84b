//! Endpoints of HTTP server.
//!
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::{
    body::StreamBody,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    alert::PersonAlert,
    gps::GpsTracker,
    logbook::{DetectionLog, LogEntry},
    meter::FpsMeter,
    AnnotatedSender,
};

/// Number of log entries shown by the `/logs` view.
pub const LOG_TAIL: usize = 5;

/// Shared handles exposed to the HTTP layer.
pub struct AppState {
    pub logbook: Arc<Mutex<DetectionLog>>,
    pub gps: Arc<GpsTracker>,
    pub alert: Arc<PersonAlert>,
    pub meter: Arc<FpsMeter>,
    pub annotated_tx: AnnotatedSender,
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Endpoint streaming annotated frames.
pub async fn detection_stream(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    log::info!("Annotated stream requested");

    let rx = state.annotated_tx.subscribe();
    let body = StreamBody::new(BroadcastStream::from(rx));

    // Set body and headers for multipart streaming
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

/// The most recent log entries.
pub async fn recent_logs(Extension(state): Extension<Arc<AppState>>) -> Json<Vec<LogEntry>> {
    let logbook = state.logbook.lock().unwrap();
    Json(logbook.tail(LOG_TAIL).to_vec())
}

/// Download the full detection log as CSV.
pub async fn export_csv(Extension(state): Extension<Arc<AppState>>) -> Response {
    let csv = state.logbook.lock().unwrap().to_csv();

    match csv {
        Ok(csv) => (
            [
                (header::CONTENT_TYPE, "text/csv"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"detection_logs.csv\"",
                ),
            ],
            csv,
        )
            .into_response(),
        Err(err) => {
            log::error!("CSV export failed: {err:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, "export failed").into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub fps: u32,
    pub speed_kmh: Option<f64>,
    pub coordinates: Option<String>,
    pub warning: bool,
    pub warning_text: Option<String>,
}

/// Live pipeline status: frame rate, speed, position and warning state.
pub async fn status(Extension(state): Extension<Arc<AppState>>) -> Json<Status> {
    let now = Instant::now();

    Json(Status {
        fps: state.meter.fps(),
        speed_kmh: state.gps.speed_kmh(),
        coordinates: state
            .gps
            .current()
            .map(|fix| format!("{:.6}, {:.6}", fix.latitude, fix.longitude)),
        warning: state.alert.is_active(now),
        warning_text: state.alert.message(now),
    })
}
