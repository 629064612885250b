use crate::auth::CurrentUser;
use crate::database::postgres_repository::PostgresRepository;
use crate::database::student::StudentRepository;
use crate::error::app_error::AppError;
use crate::models::student::StudentQrResponse;
use crate::service::qr_code::{SvgQrRenderer, student_card};
use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_okapi::openapi;
use sqlx::PgPool;
use uuid::Uuid;

/// Personal QR card a professor scans to record the student
#[openapi(tag = "Students")]
#[get("/<id>/qr")]
pub async fn get_student_qr(pool: &State<PgPool>, current_user: CurrentUser, id: &str) -> Result<Json<StudentQrResponse>, AppError> {
    let uuid = Uuid::parse_str(id)?;
    current_user.can_view_student(&uuid)?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let student = repo.get_student_by_id(&uuid).await?.ok_or_else(AppError::student_not_found)?;

    let card = tokio::task::spawn_blocking(move || student_card(&student, &SvgQrRenderer))
        .await
        .map_err(|e| AppError::QrRender {
            message: format!("Task join error: {}", e),
        })??;
    Ok(Json(card))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![get_student_qr]
}
