//! HTTP surface: students, lesson submission, and the PDF report download.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::db;
use crate::metrics::Metrics;
use crate::models::{LessonRecord, LessonSubmission, NewStudent, StudentView};
use crate::report::{self, ReportError, ReportService};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub reports: Arc<ReportService>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(pool: PgPool, reports: ReportService, metrics: Metrics) -> Self {
        Self {
            pool,
            reports: Arc::new(reports),
            metrics: Arc::new(metrics),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Student not found")]
    StudentNotFound,
    #[error("No lesson data found for this student, year and month")]
    RecordNotFound,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("metrics encoding failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::StudentNotFound | ApiError::RecordNotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Report(ReportError::TemplateNotFound(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Report(_) | ApiError::Database(_) | ApiError::Metrics(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Report(ReportError::TemplateNotFound(_)) => {
                format!("Report template missing: {self}")
            }
            ApiError::Report(_) => format!("Report generation failed: {self}"),
            ApiError::Database(_) => "Database error".to_string(),
            _ => self.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(ErrorResponse { detail: self.detail() })).into_response()
    }
}

/// Composite key of a lesson record, as query parameters.
#[derive(Debug, Deserialize)]
pub struct LessonKey {
    pub student_id: i64,
    pub year: i32,
    pub month: i32,
}

impl LessonKey {
    fn validate(&self) -> Result<(), ApiError> {
        if !(1..=12).contains(&self.month) {
            return Err(ApiError::Validation(format!(
                "month must be between 1 and 12, got {}",
                self.month
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/students", get(list_students).post(create_student))
        .route("/api/students/:student_id", get(get_student))
        .route("/api/lessons", get(get_lesson).post(submit_lesson))
        .route("/api/report/pdf", get(report_pdf))
        .route("/metrics", get(metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_http))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Counts and times every routed request, labelled by route pattern.
async fn track_http(
    State(state): State<AppState>,
    matched: Option<MatchedPath>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = matched
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    state
        .metrics
        .observe_http(&method, &path, response.status().as_u16(), started.elapsed());
    response
}

/// GET /metrics
async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response())
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match db::ping(&state.pool).await {
        Ok(()) => "ok",
        Err(error) => {
            warn!(%error, "database health check failed");
            "error"
        }
    };

    Json(HealthResponse {
        status: if database == "ok" { "ok" } else { "degraded" },
        database,
    })
}

/// GET /api/students
async fn list_students(State(state): State<AppState>) -> Result<Json<Vec<StudentView>>, ApiError> {
    let students = db::list_students(&state.pool).await?;
    Ok(Json(students.into_iter().map(StudentView::from).collect()))
}

/// POST /api/students
async fn create_student(
    State(state): State<AppState>,
    Json(student): Json<NewStudent>,
) -> Result<(StatusCode, Json<StudentView>), ApiError> {
    student.validate().map_err(ApiError::Validation)?;
    let created = db::create_student(&state.pool, &student).await?;
    info!(student_id = created.id, "student created");
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// GET /api/students/:student_id
async fn get_student(
    State(state): State<AppState>,
    Path(student_id): Path<i64>,
) -> Result<Json<StudentView>, ApiError> {
    db::get_student(&state.pool, student_id)
        .await?
        .map(|student| Json(student.into()))
        .ok_or(ApiError::StudentNotFound)
}

/// POST /api/lessons
async fn submit_lesson(
    State(state): State<AppState>,
    Json(lesson): Json<LessonSubmission>,
) -> Result<(StatusCode, Json<LessonRecord>), ApiError> {
    lesson.validate().map_err(ApiError::Validation)?;

    if db::get_student(&state.pool, lesson.student_id).await?.is_none() {
        return Err(ApiError::StudentNotFound);
    }

    let record = db::upsert_lesson(&state.pool, &lesson).await?;
    state.metrics.lesson_saved();
    info!(
        student_id = record.student_id,
        year = record.year,
        month = record.month,
        "lesson saved"
    );
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/lessons?student_id=&year=&month=
async fn get_lesson(
    State(state): State<AppState>,
    Query(key): Query<LessonKey>,
) -> Result<Json<Option<LessonRecord>>, ApiError> {
    key.validate()?;
    let record = db::fetch_lesson(&state.pool, key.student_id, key.year, key.month).await?;
    Ok(Json(record))
}

/// GET /api/report/pdf?student_id=&year=&month=
async fn report_pdf(
    State(state): State<AppState>,
    Query(key): Query<LessonKey>,
) -> Result<Response, ApiError> {
    key.validate()?;

    let record = db::fetch_report_record(&state.pool, key.student_id, key.year, key.month)
        .await?
        .ok_or(ApiError::RecordNotFound)?;

    let pdf = state.reports.generate(&record).await?;
    state.metrics.report_generated();
    let filename = report::report_filename(record.student_id, key.year, key.month);

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        pdf,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use super::*;
    use crate::config::ReportConfig;
    use crate::report::ConversionFailure;

    /// A pool that never reaches a server; fine for paths that fail first.
    fn unreachable_state() -> AppState {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(500))
            .connect_lazy("postgres://app@127.0.0.1:1/english_lessons")
            .unwrap();
        AppState::new(
            pool,
            ReportService::from_config(&ReportConfig::default()),
            Metrics::new().unwrap(),
        )
    }

    #[test]
    fn error_kinds_map_to_distinct_statuses() {
        assert_eq!(ApiError::RecordNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Validation("month".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(ReportError::TemplateNotFound(PathBuf::from("t.docx"))).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(ReportError::ConversionFailed(ConversionFailure::TimedOut(
                Duration::from_secs(60)
            )))
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn template_missing_detail_names_the_problem() {
        let error = ApiError::from(ReportError::TemplateNotFound(PathBuf::from(
            "templates/report_template.docx",
        )));
        assert_eq!(
            error.detail(),
            "Report template missing: report template not found: templates/report_template.docx"
        );
    }

    #[tokio::test]
    async fn report_rejects_out_of_range_month_before_lookup() {
        let response = create_router(unreachable_state())
            .oneshot(
                Request::get("/api/report/pdf?student_id=1&year=2024&month=13")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["detail"], "month must be between 1 and 12, got 13");
    }

    #[tokio::test]
    async fn submit_validates_before_touching_the_database() {
        let response = create_router(unreachable_state())
            .oneshot(
                Request::post("/api/lessons")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"student_id": 1, "year": 2024, "month": 3, "hours_studied": 20}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    async fn get_text(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn metrics_count_requests_by_route_and_only_successful_saves() {
        let router = create_router(unreachable_state());

        let rejected = router
            .clone()
            .oneshot(
                Request::post("/api/lessons")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"student_id": 1, "year": 2024, "month": 0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let (status, _) = get_text(router.clone(), "/api/report/pdf?student_id=1&year=2024&month=13").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, text) = get_text(router, "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("lessons_saved_total 0"));
        assert!(text.contains("reports_generated_total 0"));
        let report_requests = text
            .lines()
            .find(|line| {
                line.starts_with("http_requests_total{") && line.contains(r#"path="/api/report/pdf""#)
            })
            .unwrap();
        assert!(report_requests.contains(r#"status_code="422""#));
        assert!(report_requests.ends_with(" 1"));
    }

    #[tokio::test]
    async fn health_reports_degraded_without_database() {
        let response = create_router(unreachable_state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["database"], "error");
    }
}
