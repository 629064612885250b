use chrono::{DateTime, NaiveDate, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, JsonSchema, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    Excused,
    CatchingUp,
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttendanceStatus::Present => write!(f, "PRESENT"),
            AttendanceStatus::Late => write!(f, "LATE"),
            AttendanceStatus::Absent => write!(f, "ABSENT"),
            AttendanceStatus::Excused => write!(f, "EXCUSED"),
            AttendanceStatus::CatchingUp => write!(f, "CATCHING_UP"),
        }
    }
}

/// Which path created a record.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceOrigin {
    Manual,
    Professor,
    Student,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub session_id: Uuid,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub scanned_at: DateTime<Utc>,
    pub justified: bool,
    pub justification_note: Option<String>,
    pub justification_document: Option<String>,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub origin: AttendanceOrigin,
}

/// A record about to be inserted; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewAttendanceRecord {
    pub student_id: Uuid,
    pub session_id: Uuid,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub scanned_at: DateTime<Utc>,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub origin: AttendanceOrigin,
}

/// Device and position data that may accompany a scan.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ScanMetadata {
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct CodeScanRequest {
    pub session_id: Uuid,
    #[validate(length(min = 1, max = 32))]
    pub cne: String,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    pub device_info: Option<String>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct StudentQrScanRequest {
    pub session_id: Uuid,
    pub student_id: Uuid,
    #[validate(length(min = 1, max = 512))]
    pub payload: String,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    pub device_info: Option<String>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct SessionQrScanRequest {
    #[validate(length(min = 1, max = 512))]
    pub payload: String,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    pub device_info: Option<String>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct ManualAttendanceRequest {
    pub session_id: Uuid,
    pub student_id: Uuid,
    pub status: AttendanceStatus,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct BulkAttendanceRequest {
    pub session_id: Uuid,
    pub status: AttendanceStatus,
    #[validate(length(min = 1, max = 500))]
    pub student_ids: Vec<Uuid>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct JustificationRequest {
    #[validate(length(min = 3, max = 2000))]
    pub note: String,
    #[validate(length(max = 512))]
    pub document: Option<String>,
}

/// Generic correction of a record. Unlike justification this does not
/// restrict which status transitions are allowed.
#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct AttendanceUpdateRequest {
    pub status: AttendanceStatus,
    pub justified: bool,
    #[validate(length(max = 2000))]
    pub justification_note: Option<String>,
    #[validate(length(max = 512))]
    pub justification_document: Option<String>,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct AttendanceResponse {
    pub id: Uuid,
    pub student_id: Uuid,
    pub session_id: Uuid,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub scanned_at: DateTime<Utc>,
    pub justified: bool,
    pub justification_note: Option<String>,
    pub justification_document: Option<String>,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub origin: AttendanceOrigin,
}

impl From<&AttendanceRecord> for AttendanceResponse {
    fn from(record: &AttendanceRecord) -> Self {
        Self {
            id: record.id,
            student_id: record.student_id,
            session_id: record.session_id,
            date: record.date,
            status: record.status,
            scanned_at: record.scanned_at,
            justified: record.justified,
            justification_note: record.justification_note.clone(),
            justification_document: record.justification_document.clone(),
            device_info: record.device_info.clone(),
            ip_address: record.ip_address.clone(),
            origin: record.origin,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, JsonSchema)]
pub struct BulkItemFailure {
    pub student_id: Uuid,
    pub reason: String,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, JsonSchema)]
pub struct BulkAttendanceResponse {
    pub recorded: usize,
    pub skipped: usize,
    pub failed: Vec<BulkItemFailure>,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, JsonSchema)]
pub struct AttendanceSummaryResponse {
    pub session_id: Uuid,
    pub enrolled: usize,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    pub excused: usize,
    pub catching_up: usize,
    pub unrecorded: usize,
}
