use rocket::serde::Serialize;
use schemars::JsonSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct Student {
    pub id: Uuid,
    /// National academic identifier, unique per student.
    pub cne: String,
    pub first_name: String,
    pub last_name: String,
    pub group_ids: Vec<Uuid>,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct StudentQrResponse {
    pub student_id: Uuid,
    pub payload: String,
    /// QR code as a data URL (image/svg+xml base64)
    pub qr_code: String,
}
