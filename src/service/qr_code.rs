use crate::config::AttendanceConfig;
use crate::error::app_error::AppError;
use crate::error::attendance_rejection::AttendanceRejection;
use crate::models::class_session::{AttendanceMode, ClassSession};
use crate::models::student::{Student, StudentQrResponse};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Duration, Utc};
use qrcode::QrCode;
use std::str::FromStr;
use uuid::Uuid;

const STUDENT_TAG: &str = "STUDENT";
const SESSION_TAG: &str = "SESSION";

/// Turns an opaque token into a displayable image.
pub trait QrRenderer: Send + Sync {
    fn render(&self, token: &str) -> Result<Vec<u8>, AppError>;
    fn media_type(&self) -> &'static str;

    fn render_data_url(&self, token: &str) -> Result<String, AppError> {
        let bytes = self.render(token)?;
        Ok(format!("data:{};base64,{}", self.media_type(), general_purpose::STANDARD.encode(bytes)))
    }
}

/// Renders QR codes as SVG documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvgQrRenderer;

impl QrRenderer for SvgQrRenderer {
    fn render(&self, token: &str) -> Result<Vec<u8>, AppError> {
        let qr = QrCode::new(token.as_bytes()).map_err(|e| AppError::QrRender {
            message: format!("Failed to generate QR code: {}", e),
        })?;
        let svg = qr.render::<qrcode::render::svg::Color>().min_dimensions(240, 240).build();
        Ok(svg.into_bytes())
    }

    fn media_type(&self) -> &'static str {
        "image/svg+xml"
    }
}

/// Payload printed on a student's personal card: `STUDENT:<id>:<cne>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentQrPayload {
    pub student_id: Uuid,
    pub cne: String,
}

impl StudentQrPayload {
    pub fn for_student(student: &Student) -> Self {
        Self {
            student_id: student.id,
            cne: student.cne.clone(),
        }
    }
}

impl std::fmt::Display for StudentQrPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", STUDENT_TAG, self.student_id, self.cne)
    }
}

impl FromStr for StudentQrPayload {
    type Err = AttendanceRejection;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let [tag, id, cne] = split_triple(value)?;
        if tag != STUDENT_TAG {
            return Err(AttendanceRejection::invalid_payload(format!("expected {} tag", STUDENT_TAG)));
        }
        let student_id = Uuid::parse_str(id).map_err(|_| AttendanceRejection::invalid_payload("malformed student id"))?;
        if cne.is_empty() {
            return Err(AttendanceRejection::invalid_payload("missing CNE"));
        }
        Ok(Self {
            student_id,
            cne: cne.to_string(),
        })
    }
}

/// Payload shown on the session screen: `SESSION:<id>:<issued_at_ms>.<nonce>`.
///
/// The nonce makes two tokens issued for the same session in the same
/// millisecond differ, so a token cannot be reconstructed from the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionQrPayload {
    pub session_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub nonce: String,
}

impl SessionQrPayload {
    pub fn generate(session_id: Uuid, issued_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            issued_at,
            nonce: Uuid::new_v4().simple().to_string(),
        }
    }
}

impl std::fmt::Display for SessionQrPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}.{}", SESSION_TAG, self.session_id, self.issued_at.timestamp_millis(), self.nonce)
    }
}

impl FromStr for SessionQrPayload {
    type Err = AttendanceRejection;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let [tag, id, issued] = split_triple(value)?;
        if tag != SESSION_TAG {
            return Err(AttendanceRejection::invalid_payload(format!("expected {} tag", SESSION_TAG)));
        }
        let session_id = Uuid::parse_str(id).map_err(|_| AttendanceRejection::invalid_payload("malformed session id"))?;

        let (millis, nonce) = issued
            .split_once('.')
            .ok_or_else(|| AttendanceRejection::invalid_payload("malformed issue stamp"))?;
        if nonce.is_empty() || !nonce.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AttendanceRejection::invalid_payload("malformed issue stamp"));
        }
        let issued_at = millis
            .parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| AttendanceRejection::invalid_payload("malformed issue stamp"))?;

        Ok(Self {
            session_id,
            issued_at,
            nonce: nonce.to_string(),
        })
    }
}

/// Splits on the first two colons only; the last field keeps any colons it
/// contains, since CNE values are free text.
fn split_triple(value: &str) -> Result<[&str; 3], AttendanceRejection> {
    let mut parts = value.trim().splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(tag), Some(id), Some(rest)) => Ok([tag, id, rest]),
        _ => Err(AttendanceRejection::invalid_payload("expected three colon-separated fields")),
    }
}

/// Issues and manages session QR tokens. Mutates the in-memory session; the
/// caller persists it.
pub struct QrCodeIssuer<'a> {
    config: &'a AttendanceConfig,
    renderer: &'a dyn QrRenderer,
}

impl<'a> QrCodeIssuer<'a> {
    pub fn new(config: &'a AttendanceConfig, renderer: &'a dyn QrRenderer) -> Self {
        Self { config, renderer }
    }

    /// Expiry tied to the schedule: session end plus grace period.
    pub fn scheduled_expiry(&self, session: &ClassSession) -> DateTime<Utc> {
        session.end_time() + Duration::minutes(self.config.grace_period_minutes)
    }

    pub fn issue(&self, session: &mut ClassSession, now: DateTime<Utc>) -> Result<String, AppError> {
        let token = SessionQrPayload::generate(session.id, now).to_string();
        let image = self.renderer.render_data_url(&token)?;

        session.qr_token = Some(token.clone());
        session.qr_expires_at = Some(self.scheduled_expiry(session));
        session.qr_image = Some(image);
        Ok(token)
    }

    /// Replaces the token; the previous value stops matching immediately.
    pub fn regenerate(&self, session: &mut ClassSession, now: DateTime<Utc>) -> Result<String, AppError> {
        self.issue(session, now)
    }

    /// Opens the session for student self-scan for `validity_minutes` from now.
    pub fn activate(&self, session: &mut ClassSession, validity_minutes: i64, now: DateTime<Utc>) -> Result<(), AppError> {
        if session.qr_token.is_none() {
            self.issue(session, now)?;
        }
        session.qr_expires_at = Some(now + Duration::minutes(validity_minutes));
        session.attendance_mode = AttendanceMode::StudentScan;
        Ok(())
    }

    /// Expires the token without clearing it, keeping the last value for audit.
    pub fn deactivate(&self, session: &mut ClassSession, now: DateTime<Utc>) {
        session.qr_expires_at = Some(now - Duration::minutes(1));
    }
}

/// Builds the printable card for a student's personal QR code.
pub fn student_card(student: &Student, renderer: &dyn QrRenderer) -> Result<StudentQrResponse, AppError> {
    let payload = StudentQrPayload::for_student(student).to_string();
    let qr_code = renderer.render_data_url(&payload)?;
    Ok(StudentQrResponse {
        student_id: student.id,
        payload,
        qr_code,
    })
}

pub fn is_qr_valid(session: &ClassSession, now: DateTime<Utc>) -> bool {
    session.qr_token.is_some() && session.qr_expires_at.is_some_and(|expires_at| now < expires_at)
}
