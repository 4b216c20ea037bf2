//! JSON API served by the daemon.

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use attendface_core::attendance::LedgerError;
use attendface_core::gallery::GalleryError;
use attendface_core::protocol::{
    AttendanceTable, CheckinRequest, CheckoutRequest, IdentifyFaceRequest, IdentifyFaceResponse, MarkResponse,
    RegisterFaceRequest, RegisterFaceResponse,
};
use attendface_core::{AttendanceBook, Mark, StudentSummary};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub attendance: Arc<AttendanceBook>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes();
    Router::new()
        .route("/api/register_face", post(register_face))
        .route("/api/identify_face", post(identify_face))
        .route("/api/checkin", post(checkin))
        .route("/api/checkout", post(checkout))
        .route("/api/attendance", get(attendance))
        .route("/api/students", get(students))
        .route("/api/status", get(status))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    MissingClass,
    Ledger(LedgerError),
    Blocking(tokio::task::JoinError),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::Ledger(e)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Blocking(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, body) = match self {
            ApiError::Engine(EngineError::Gallery(e)) => {
                let code = match e {
                    GalleryError::NoClassData(_) => StatusCode::NOT_FOUND,
                    GalleryError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (code, serde_json::json!({"status": "fail", "message": e.to_string()}))
            }
            ApiError::Engine(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({"status": "fail", "message": e.to_string()}),
            ),
            ApiError::MissingClass => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({"success": false, "error": "Class parameter is required"}),
            ),
            ApiError::Ledger(e) => {
                let code = match e {
                    LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
                    LedgerError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = match e {
                    LedgerError::NotFound(class) => format!("Attendance file not found for {class}"),
                    other => other.to_string(),
                };
                (code, serde_json::json!({"success": false, "error": message}))
            }
            ApiError::Blocking(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"success": false, "error": e.to_string()}),
            ),
        };
        (code, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ClassQuery {
    class: Option<String>,
}

impl ClassQuery {
    fn require(self) -> Result<String, ApiError> {
        self.class.filter(|c| !c.is_empty()).ok_or(ApiError::MissingClass)
    }
}

async fn register_face(
    State(state): State<AppState>,
    Json(req): Json<RegisterFaceRequest>,
) -> Result<Json<RegisterFaceResponse>, ApiError> {
    tracing::info!(class = %req.class_name, enrollment = %req.enrollment, images = req.images.len(), "register_face");
    Ok(Json(state.engine.register_face(req).await?))
}

async fn identify_face(
    State(state): State<AppState>,
    Json(req): Json<IdentifyFaceRequest>,
) -> Result<Json<IdentifyFaceResponse>, ApiError> {
    tracing::info!(class = %req.class_name, "identify_face");
    Ok(Json(state.engine.identify_face(req).await?))
}

/// Ledger outcome as a mark response; ledger failures become `fail` bodies.
fn mark_response(result: Result<Mark, LedgerError>) -> (StatusCode, Json<MarkResponse>) {
    match result {
        Ok(mark) => (StatusCode::OK, Json(MarkResponse::from(mark))),
        Err(e) => {
            tracing::warn!(error = %e, "attendance update failed");
            let code = match e {
                LedgerError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (code, Json(MarkResponse::fail(e.to_string())))
        }
    }
}

async fn checkin(
    State(state): State<AppState>,
    Json(req): Json<CheckinRequest>,
) -> Result<(StatusCode, Json<MarkResponse>), ApiError> {
    let book = Arc::clone(&state.attendance);
    let result =
        tokio::task::spawn_blocking(move || book.checkin(&req.class_name, &req.enrollment, &req.name)).await?;
    Ok(mark_response(result))
}

async fn checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<MarkResponse>), ApiError> {
    let book = Arc::clone(&state.attendance);
    let result = tokio::task::spawn_blocking(move || book.checkout(&req.class_name, &req.enrollment)).await?;
    Ok(mark_response(result))
}

async fn attendance(
    State(state): State<AppState>,
    Query(query): Query<ClassQuery>,
) -> Result<Json<AttendanceTable>, ApiError> {
    let class = query.require()?;
    let book = Arc::clone(&state.attendance);
    let records = tokio::task::spawn_blocking(move || book.records(&class)).await??;
    Ok(Json(AttendanceTable::from(records)))
}

async fn students(
    State(state): State<AppState>,
    Query(query): Query<ClassQuery>,
) -> Result<Json<Vec<StudentSummary>>, ApiError> {
    let class = query.require()?;
    Ok(Json(state.engine.students(class).await?))
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = &state.config;
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "model_path": config.model_path.display().to_string(),
        "dataset_dir": config.dataset_dir.display().to_string(),
        "attendance_dir": config.attendance_dir.display().to_string(),
        "neighbors": config.neighbors,
        "equalize_probe": config.equalize_probe,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use attendface_core::{BoundingBox, FaceLocator, GalleryStore};
    use axum::body::Body;
    use axum::http::Request;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use image::{DynamicImage, GrayImage, ImageFormat, Rgb, RgbImage};
    use serde_json::{json, Value};
    use std::io::Cursor;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Everything that differs from the top-left pixel is the face.
    struct ContrastLocator;

    impl FaceLocator for ContrastLocator {
        fn locate(&mut self, gray: &GrayImage) -> Vec<BoundingBox> {
            let Some(bg) = gray.get_pixel_checked(0, 0).map(|p| p.0[0]) else {
                return Vec::new();
            };
            let hits: Vec<(u32, u32)> = gray
                .enumerate_pixels()
                .filter(|(_, _, p)| p.0[0] != bg)
                .map(|(x, y, _)| (x, y))
                .collect();
            let (Some(x0), Some(x1)) = (hits.iter().map(|h| h.0).min(), hits.iter().map(|h| h.0).max()) else {
                return Vec::new();
            };
            let y0 = hits.iter().map(|h| h.1).min().unwrap_or(0);
            let y1 = hits.iter().map(|h| h.1).max().unwrap_or(0);
            vec![BoundingBox { x: x0, y: y0, width: x1 - x0 + 1, height: y1 - y0 + 1 }]
        }
    }

    fn face_png(tint: u8) -> String {
        let img = RgbImage::from_fn(96, 96, |x, y| {
            if (16..72).contains(&x) && (16..72).contains(&y) {
                Rgb([210, 120 + ((x + 2 * y) % 90) as u8, tint])
            } else {
                Rgb([5, 5, 5])
            }
        });
        encode(DynamicImage::ImageRgb8(img))
    }

    fn blank_png() -> String {
        encode(DynamicImage::ImageRgb8(RgbImage::from_pixel(96, 96, Rgb([5, 5, 5]))))
    }

    fn encode(img: DynamicImage) -> String {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(buf.into_inner()))
    }

    fn app() -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let config = Config {
            dataset_dir: dir.path().join("faces"),
            attendance_dir: dir.path().join("attendance"),
            ..Config::default()
        };
        let store = GalleryStore::open(&config.dataset_dir).unwrap();
        let engine = spawn_engine(|| Ok(ContrastLocator), store, config.pipeline_options()).unwrap();
        let attendance = Arc::new(AttendanceBook::open(&config.attendance_dir).unwrap());
        let state = AppState {
            engine,
            attendance,
            config: Arc::new(config),
        };
        (dir, router(state))
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let code = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (code, serde_json::from_slice(&bytes).unwrap())
    }

    async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(app, req).await
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    #[tokio::test]
    async fn test_enroll_then_identify() {
        let (_dir, app) = app();

        let (code, body) = post_json(
            &app,
            "/api/register_face",
            json!({"class_name": "CS101", "name": "Ada", "enrollment": "007", "images": [face_png(0), face_png(1)]}),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, json!({"status": "success", "message": "4 faces saved", "count": 4}));

        let (_, body) = post_json(&app, "/api/identify_face", json!({"class_name": "CS101", "image": face_png(0)})).await;
        assert_eq!(body, json!({"status": "success", "name": "Ada", "enrollment": "007"}));

        let (_, body) = post_json(&app, "/api/identify_face", json!({"class_name": "CS101", "image": blank_png()})).await;
        assert_eq!(body, json!({"status": "fail", "message": "Face not recognized"}));

        let (code, body) = get_json(&app, "/api/students?class=CS101").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, json!([{"enrollment": "007", "name": "Ada", "vectors": 4}]));
    }

    #[tokio::test]
    async fn test_register_without_faces() {
        let (_dir, app) = app();
        let (_, body) = post_json(
            &app,
            "/api/register_face",
            json!({"class_name": "CS101", "name": "Ada", "enrollment": "007", "images": [blank_png()]}),
        )
        .await;
        assert_eq!(body, json!({"status": "fail", "message": "No faces detected"}));
    }

    #[tokio::test]
    async fn test_identify_unknown_class() {
        let (_dir, app) = app();
        let (_, body) = post_json(&app, "/api/identify_face", json!({"class_name": "CS999", "image": face_png(0)})).await;
        assert_eq!(body["message"], "No data for this class");
    }

    #[tokio::test]
    async fn test_checkin_checkout_flow() {
        let (_dir, app) = app();
        let checkin = json!({"class_name": "CS101", "enrollment": "007", "name": "Ada"});
        let checkout = json!({"class_name": "CS101", "enrollment": "007"});

        let (_, body) = post_json(&app, "/api/checkout", checkout.clone()).await;
        assert_eq!(body, json!({"status": "fail", "message": "Please check-in first"}));

        let (_, body) = post_json(&app, "/api/checkin", checkin.clone()).await;
        assert_eq!(body, json!({"status": "success", "message": "Check-in successful"}));
        let (_, body) = post_json(&app, "/api/checkin", checkin).await;
        assert_eq!(body, json!({"status": "fail", "message": "Already checked in"}));

        let (_, body) = post_json(&app, "/api/checkout", checkout.clone()).await;
        assert_eq!(body, json!({"status": "success", "message": "Check-out successful"}));
        let (_, body) = post_json(&app, "/api/checkout", checkout).await;
        assert_eq!(body, json!({"status": "fail", "message": "Already checked out"}));

        let (code, body) = get_json(&app, "/api/attendance?class=CS101").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 1);
        assert_eq!(body["columns"], json!(["Enrollment", "Name", "Date", "CheckIn", "CheckOut"]));
        assert_eq!(body["data"][0]["Name"], "Ada");
        assert_ne!(body["data"][0]["CheckOut"], "");
    }

    #[tokio::test]
    async fn test_checkin_invalid_class() {
        let (_dir, app) = app();
        let (code, body) =
            post_json(&app, "/api/checkin", json!({"class_name": "../x", "enrollment": "007", "name": "Ada"})).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "fail");
    }

    #[tokio::test]
    async fn test_attendance_requires_class() {
        let (_dir, app) = app();
        let (code, body) = get_json(&app, "/api/attendance").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Class parameter is required");
    }

    #[tokio::test]
    async fn test_attendance_missing_ledger() {
        let (_dir, app) = app();
        let (code, body) = get_json(&app, "/api/attendance?class=CS101").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Attendance file not found for CS101");
    }

    #[tokio::test]
    async fn test_students_unknown_class() {
        let (_dir, app) = app();
        let (code, _) = get_json(&app, "/api/students?class=CS101").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status() {
        let (_dir, app) = app();
        let (code, body) = get_json(&app, "/api/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["neighbors"], 5);
        assert!(body["version"].is_string());
    }
}
