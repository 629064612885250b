use crate::auth::CurrentUser;
use crate::config::Config;
use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::class_session::{ActivateQrRequest, AttendanceWindowResponse, SessionCompletionResponse, SessionQrResponse};
use crate::service::attendance::AttendanceService;
use crate::service::class_session::SessionQrService;
use crate::service::qr_code::SvgQrRenderer;
use chrono::Utc;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Issue a QR code valid until the end of the session plus grace period
#[openapi(tag = "Sessions")]
#[post("/<id>/qr")]
pub async fn issue_session_qr(pool: &State<PgPool>, config: &State<Config>, current_user: CurrentUser, id: &str) -> Result<Json<SessionQrResponse>, AppError> {
    current_user.require_staff()?;
    let uuid = Uuid::parse_str(id)?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = SessionQrService::new(&repo, &config.attendance, Arc::new(SvgQrRenderer));
    Ok(Json(service.issue(&uuid, Utc::now()).await?))
}

/// Replace the session QR code; previously displayed codes stop working
#[openapi(tag = "Sessions")]
#[post("/<id>/qr/regenerate")]
pub async fn regenerate_session_qr(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    id: &str,
) -> Result<Json<SessionQrResponse>, AppError> {
    current_user.require_staff()?;
    let uuid = Uuid::parse_str(id)?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = SessionQrService::new(&repo, &config.attendance, Arc::new(SvgQrRenderer));
    Ok(Json(service.regenerate(&uuid, Utc::now()).await?))
}

/// Open student self-scan for a limited number of minutes
#[openapi(tag = "Sessions")]
#[post("/<id>/qr/activate", data = "<payload>")]
pub async fn activate_session_qr(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    id: &str,
    payload: Option<Json<ActivateQrRequest>>,
) -> Result<Json<SessionQrResponse>, AppError> {
    current_user.require_staff()?;
    let uuid = Uuid::parse_str(id)?;
    let request = payload.map(Json::into_inner).unwrap_or_default();
    request.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = SessionQrService::new(&repo, &config.attendance, Arc::new(SvgQrRenderer));
    Ok(Json(service.activate(&uuid, request.validity_minutes, Utc::now()).await?))
}

#[openapi(tag = "Sessions")]
#[post("/<id>/qr/deactivate")]
pub async fn deactivate_session_qr(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    id: &str,
) -> Result<Json<SessionQrResponse>, AppError> {
    current_user.require_staff()?;
    let uuid = Uuid::parse_str(id)?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = SessionQrService::new(&repo, &config.attendance, Arc::new(SvgQrRenderer));
    Ok(Json(service.deactivate(&uuid, Utc::now()).await?))
}

#[openapi(tag = "Sessions")]
#[get("/<id>/qr")]
pub async fn get_session_qr(pool: &State<PgPool>, config: &State<Config>, current_user: CurrentUser, id: &str) -> Result<Json<SessionQrResponse>, AppError> {
    current_user.require_staff()?;
    let uuid = Uuid::parse_str(id)?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = SessionQrService::new(&repo, &config.attendance, Arc::new(SvgQrRenderer));
    Ok(Json(service.status(&uuid, Utc::now()).await?))
}

/// When scans are accepted for this session and when they turn late
#[openapi(tag = "Sessions")]
#[get("/<id>/window")]
pub async fn get_attendance_window(
    pool: &State<PgPool>,
    config: &State<Config>,
    _current_user: CurrentUser,
    id: &str,
) -> Result<Json<AttendanceWindowResponse>, AppError> {
    let uuid = Uuid::parse_str(id)?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = SessionQrService::new(&repo, &config.attendance, Arc::new(SvgQrRenderer));
    Ok(Json(service.window(&uuid, Utc::now()).await?))
}

/// Close the session and mark enrolled students without a record as absent
#[openapi(tag = "Sessions")]
#[post("/<id>/complete")]
pub async fn complete_session(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    id: &str,
) -> Result<Json<SessionCompletionResponse>, AppError> {
    current_user.require_staff()?;
    let uuid = Uuid::parse_str(id)?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let marked_absent = AttendanceService::new(&repo, &config.attendance).complete_session(&uuid, Utc::now()).await?;
    Ok(Json(SessionCompletionResponse {
        session_id: uuid,
        marked_absent,
    }))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![
        issue_session_qr,
        regenerate_session_qr,
        activate_session_qr,
        deactivate_session_qr,
        get_session_qr,
        get_attendance_window,
        complete_session
    ]
}
