use crate::models::attendance::AttendanceStatus;
use crate::models::class_session::AttendanceMode;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Reasons a scan or status change is refused. None of these are fatal: the
/// caller can retry with different input, at a different time, or fall back
/// to manual entry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttendanceRejection {
    #[error("Invalid QR payload: {reason}")]
    InvalidPayload { reason: String },
    #[error("QR payload does not belong to student {student_id}")]
    PayloadMismatch { student_id: Uuid },
    #[error("Session is not accepting student scans (current mode: {mode})")]
    WrongMode { mode: AttendanceMode },
    #[error("QR code is not the current code for this session")]
    TokenMismatch,
    #[error("QR code has expired{}", .expired_at.map(|at| format!(" (at {})", at.format("%Y-%m-%d %H:%M:%S UTC"))).unwrap_or_default())]
    TokenExpired { expired_at: Option<DateTime<Utc>> },
    #[error("Session {session_id} is already completed")]
    SessionCompleted { session_id: Uuid },
    #[error("Attendance is not open yet: it opens in {remaining} (at {})", .opens_at.format("%H:%M"))]
    TooEarly { opens_at: DateTime<Utc>, remaining: String },
    #[error("Attendance closed {elapsed} ago (at {})", .closed_at.format("%H:%M"))]
    TooLate { closed_at: DateTime<Utc>, elapsed: String },
    #[error("Student {student_id} is not enrolled in any group attached to session {session_id}")]
    NotEnrolled { student_id: Uuid, session_id: Uuid },
    #[error("Attendance already recorded with status {status}")]
    AlreadyRecorded { status: AttendanceStatus },
    #[error("Scan location is {distance_km:.3} km from campus (limit {max_distance_km:.3} km)")]
    OutOfRange { distance_km: f64, max_distance_km: f64 },
    #[error("Cannot change attendance status from {from} to {to}")]
    InvalidTransition { from: AttendanceStatus, to: AttendanceStatus },
}

impl AttendanceRejection {
    /// Stable machine-readable identifier, used as the `code` of error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AttendanceRejection::InvalidPayload { .. } => "INVALID_PAYLOAD",
            AttendanceRejection::PayloadMismatch { .. } => "PAYLOAD_MISMATCH",
            AttendanceRejection::WrongMode { .. } => "WRONG_MODE",
            AttendanceRejection::TokenMismatch => "TOKEN_MISMATCH",
            AttendanceRejection::TokenExpired { .. } => "TOKEN_EXPIRED",
            AttendanceRejection::SessionCompleted { .. } => "SESSION_COMPLETED",
            AttendanceRejection::TooEarly { .. } => "TOO_EARLY",
            AttendanceRejection::TooLate { .. } => "TOO_LATE",
            AttendanceRejection::NotEnrolled { .. } => "NOT_ENROLLED",
            AttendanceRejection::AlreadyRecorded { .. } => "ALREADY_RECORDED",
            AttendanceRejection::OutOfRange { .. } => "OUT_OF_RANGE",
            AttendanceRejection::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }

    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        AttendanceRejection::InvalidPayload { reason: reason.into() }
    }
}
