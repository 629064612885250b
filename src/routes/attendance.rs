use crate::auth::CurrentUser;
use crate::config::Config;
use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::middleware::ScanOrigin;
use crate::models::attendance::{
    AttendanceResponse, AttendanceSummaryResponse, AttendanceUpdateRequest, BulkAttendanceRequest, BulkAttendanceResponse, CodeScanRequest,
    JustificationRequest, ManualAttendanceRequest, SessionQrScanRequest, StudentQrScanRequest,
};
use crate::service::attendance::{AttendanceService, ScanIdentity, ScanRequest};
use chrono::Utc;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post, put};
use rocket_okapi::openapi;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

/// Record attendance from a student's CNE typed by the professor
#[openapi(tag = "Attendance")]
#[post("/scan/code", data = "<payload>")]
pub async fn scan_by_code(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    origin: ScanOrigin,
    payload: Json<CodeScanRequest>,
) -> Result<(Status, Json<AttendanceResponse>), AppError> {
    current_user.require_staff()?;
    payload.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AttendanceService::new(&repo, &config.attendance);
    let payload = payload.into_inner();

    let request = ScanRequest {
        identity: ScanIdentity::ByCode {
            session_id: payload.session_id,
            cne: payload.cne,
        },
        metadata: origin.scan_metadata(payload.device_info, payload.latitude, payload.longitude),
    };
    let record = service.record_scan(request, Utc::now()).await?;
    Ok((Status::Created, Json(AttendanceResponse::from(&record))))
}

/// Record attendance by scanning a student's personal QR card
#[openapi(tag = "Attendance")]
#[post("/scan/student-qr", data = "<payload>")]
pub async fn scan_student_qr(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    origin: ScanOrigin,
    payload: Json<StudentQrScanRequest>,
) -> Result<(Status, Json<AttendanceResponse>), AppError> {
    current_user.require_staff()?;
    payload.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AttendanceService::new(&repo, &config.attendance);
    let payload = payload.into_inner();

    let request = ScanRequest {
        identity: ScanIdentity::ByStudentQr {
            session_id: payload.session_id,
            student_id: payload.student_id,
            payload: payload.payload,
        },
        metadata: origin.scan_metadata(payload.device_info, payload.latitude, payload.longitude),
    };
    let record = service.record_scan(request, Utc::now()).await?;
    Ok((Status::Created, Json(AttendanceResponse::from(&record))))
}

/// Record the caller's own attendance by scanning the session QR code
#[openapi(tag = "Attendance")]
#[post("/scan/session-qr", data = "<payload>")]
pub async fn scan_session_qr(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    origin: ScanOrigin,
    payload: Json<SessionQrScanRequest>,
) -> Result<(Status, Json<AttendanceResponse>), AppError> {
    let student_id = current_user.require_student()?;
    payload.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AttendanceService::new(&repo, &config.attendance);
    let payload = payload.into_inner();

    let request = ScanRequest {
        identity: ScanIdentity::BySessionQr {
            student_id,
            payload: payload.payload,
        },
        metadata: origin.scan_metadata(payload.device_info, payload.latitude, payload.longitude),
    };
    let record = service.record_scan(request, Utc::now()).await?;
    Ok((Status::Created, Json(AttendanceResponse::from(&record))))
}

/// Record attendance for one student without scan checks
#[openapi(tag = "Attendance")]
#[post("/manual", data = "<payload>")]
pub async fn record_manual(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    origin: ScanOrigin,
    payload: Json<ManualAttendanceRequest>,
) -> Result<(Status, Json<AttendanceResponse>), AppError> {
    current_user.require_admin()?;
    payload.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AttendanceService::new(&repo, &config.attendance);
    let metadata = origin.manual_metadata();

    let record = service
        .record_manual(&payload.session_id, &payload.student_id, payload.status, metadata, Utc::now())
        .await?;
    Ok((Status::Created, Json(AttendanceResponse::from(&record))))
}

/// Record the same status for many students of a session
#[openapi(tag = "Attendance")]
#[post("/bulk", data = "<payload>")]
pub async fn record_bulk(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    payload: Json<BulkAttendanceRequest>,
) -> Result<Json<BulkAttendanceResponse>, AppError> {
    current_user.require_admin()?;
    payload.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AttendanceService::new(&repo, &config.attendance);
    let summary = service
        .record_bulk(&payload.session_id, payload.status, &payload.student_ids, Utc::now())
        .await?;
    Ok(Json(summary))
}

/// Excuse an absence with a note and optional supporting document
#[openapi(tag = "Attendance")]
#[post("/<id>/justify", data = "<payload>")]
pub async fn justify_attendance(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    id: &str,
    payload: Json<JustificationRequest>,
) -> Result<Json<AttendanceResponse>, AppError> {
    current_user.require_staff()?;
    payload.validate()?;
    let uuid = Uuid::parse_str(id)?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AttendanceService::new(&repo, &config.attendance);
    let record = service.justify(&uuid, &payload.note, payload.document.as_deref()).await?;
    Ok(Json(AttendanceResponse::from(&record)))
}

#[openapi(tag = "Attendance")]
#[get("/<id>")]
pub async fn get_attendance(pool: &State<PgPool>, config: &State<Config>, current_user: CurrentUser, id: &str) -> Result<Json<AttendanceResponse>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AttendanceService::new(&repo, &config.attendance);

    let record = service.get_attendance(&uuid).await?;
    current_user.can_view_student(&record.student_id)?;
    Ok(Json(AttendanceResponse::from(&record)))
}

/// Correct a record's status and justification fields
#[openapi(tag = "Attendance")]
#[put("/<id>", data = "<payload>")]
pub async fn put_attendance(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    id: &str,
    payload: Json<AttendanceUpdateRequest>,
) -> Result<Json<AttendanceResponse>, AppError> {
    current_user.require_admin()?;
    payload.validate()?;
    let uuid = Uuid::parse_str(id)?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AttendanceService::new(&repo, &config.attendance);
    let record = service.update_attendance(&uuid, payload.into_inner()).await?;
    Ok(Json(AttendanceResponse::from(&record)))
}

#[openapi(tag = "Attendance")]
#[delete("/<id>")]
pub async fn delete_attendance(pool: &State<PgPool>, config: &State<Config>, current_user: CurrentUser, id: &str) -> Result<Status, AppError> {
    current_user.require_admin()?;
    let uuid = Uuid::parse_str(id)?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    AttendanceService::new(&repo, &config.attendance).delete_attendance(&uuid).await?;
    Ok(Status::NoContent)
}

#[openapi(tag = "Attendance")]
#[get("/session/<id>")]
pub async fn list_session_attendance(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    id: &str,
) -> Result<Json<Vec<AttendanceResponse>>, AppError> {
    current_user.require_staff()?;
    let uuid = Uuid::parse_str(id)?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let records = AttendanceService::new(&repo, &config.attendance).list_for_session(&uuid).await?;
    Ok(Json(records.iter().map(AttendanceResponse::from).collect()))
}

#[openapi(tag = "Attendance")]
#[get("/session/<id>/summary")]
pub async fn get_session_summary(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    id: &str,
) -> Result<Json<AttendanceSummaryResponse>, AppError> {
    current_user.require_staff()?;
    let uuid = Uuid::parse_str(id)?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let summary = AttendanceService::new(&repo, &config.attendance).session_summary(&uuid).await?;
    Ok(Json(summary))
}

#[openapi(tag = "Attendance")]
#[get("/student/<id>")]
pub async fn list_student_attendance(
    pool: &State<PgPool>,
    config: &State<Config>,
    current_user: CurrentUser,
    id: &str,
) -> Result<Json<Vec<AttendanceResponse>>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    current_user.can_view_student(&uuid)?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let records = AttendanceService::new(&repo, &config.attendance).list_for_student(&uuid).await?;
    Ok(Json(records.iter().map(AttendanceResponse::from).collect()))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![
        scan_by_code,
        scan_student_qr,
        scan_session_qr,
        record_manual,
        record_bulk,
        justify_attendance,
        get_attendance,
        put_attendance,
        delete_attendance,
        list_session_attendance,
        get_session_summary,
        list_student_attendance
    ]
}
