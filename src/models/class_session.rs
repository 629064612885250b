use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

/// How attendance is collected for a session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, JsonSchema, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceMode {
    #[default]
    Manual,
    ProfessorScan,
    StudentScan,
}

impl std::fmt::Display for AttendanceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttendanceMode::Manual => write!(f, "MANUAL"),
            AttendanceMode::ProfessorScan => write!(f, "PROFESSOR_SCAN"),
            AttendanceMode::StudentScan => write!(f, "STUDENT_SCAN"),
        }
    }
}

/// One scheduled occurrence of a class meeting.
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct ClassSession {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub completed: bool,
    pub attendance_taken: bool,
    pub attendance_mode: AttendanceMode,
    pub qr_token: Option<String>,
    pub qr_expires_at: Option<DateTime<Utc>>,
    /// Rendered QR image as a `data:` URL.
    pub qr_image: Option<String>,
    pub group_ids: Vec<Uuid>,
}

impl ClassSession {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::minutes(self.duration_minutes)
    }
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct SessionQrResponse {
    pub session_id: Uuid,
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub valid: bool,
    pub attendance_mode: AttendanceMode,
    /// QR code as a data URL (image/svg+xml base64)
    pub qr_code: Option<String>,
}

#[derive(Deserialize, Debug, Default, Validate, JsonSchema)]
pub struct ActivateQrRequest {
    /// Minutes the token stays valid from now; the configured default applies when omitted.
    #[validate(range(min = 1, max = 1440))]
    pub validity_minutes: Option<i64>,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct AttendanceWindowResponse {
    pub session_id: Uuid,
    pub allowed_start: DateTime<Utc>,
    pub allowed_end: DateTime<Utc>,
    pub late_threshold: DateTime<Utc>,
    pub open: bool,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct SessionCompletionResponse {
    pub session_id: Uuid,
    pub marked_absent: usize,
}
