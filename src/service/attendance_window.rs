use crate::config::AttendanceConfig;
use crate::error::attendance_rejection::AttendanceRejection;
use crate::models::attendance::AttendanceStatus;
use crate::models::class_session::ClassSession;
use chrono::{DateTime, Duration, Utc};

/// Scans arriving later than this after the scheduled start are `LATE`.
/// Independent of the configured early allowance and grace period.
pub const LATE_THRESHOLD_MINUTES: i64 = 15;

/// The interval during which a session accepts scans, and its on-time cutoff.
///
/// This is the only place timing decisions are made; every scan path goes
/// through [`AttendanceWindow::check`] and [`AttendanceWindow::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendanceWindow {
    pub allowed_start: DateTime<Utc>,
    pub allowed_end: DateTime<Utc>,
    pub late_threshold: DateTime<Utc>,
}

impl AttendanceWindow {
    pub fn new(start: DateTime<Utc>, duration_minutes: i64, config: &AttendanceConfig) -> Self {
        let end = start + Duration::minutes(duration_minutes);
        Self {
            allowed_start: start - Duration::minutes(config.early_allowance_minutes),
            allowed_end: end + Duration::minutes(config.grace_period_minutes),
            late_threshold: start + Duration::minutes(LATE_THRESHOLD_MINUTES),
        }
    }

    pub fn for_session(session: &ClassSession, config: &AttendanceConfig) -> Self {
        Self::new(session.start_time, session.duration_minutes, config)
    }

    /// Inclusive at both bounds.
    pub fn is_within(&self, now: DateTime<Utc>) -> bool {
        self.allowed_start <= now && now <= self.allowed_end
    }

    pub fn classify(&self, now: DateTime<Utc>) -> AttendanceStatus {
        if now <= self.late_threshold {
            AttendanceStatus::Present
        } else {
            AttendanceStatus::Late
        }
    }

    pub fn check(&self, now: DateTime<Utc>) -> Result<(), AttendanceRejection> {
        if now < self.allowed_start {
            return Err(AttendanceRejection::TooEarly {
                opens_at: self.allowed_start,
                remaining: humanize_duration(self.allowed_start - now),
            });
        }
        if now > self.allowed_end {
            return Err(AttendanceRejection::TooLate {
                closed_at: self.allowed_end,
                elapsed: humanize_duration(now - self.allowed_end),
            });
        }
        Ok(())
    }
}

/// Renders a duration for user-facing messages, e.g. `45 s`, `25 min`, `1 h 05 min`.
pub fn humanize_duration(duration: Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);
    if total_seconds < 60 {
        return format!("{} s", total_seconds);
    }

    let total_minutes = total_seconds / 60;
    if total_minutes < 60 {
        return format!("{} min", total_minutes);
    }

    let total_hours = total_minutes / 60;
    if total_hours < 24 {
        return format!("{} h {:02} min", total_hours, total_minutes % 60);
    }

    format!("{} d {} h", total_hours / 24, total_hours % 24)
}
