use crate::error::attendance_rejection::AttendanceRejection;
use crate::models::attendance::{AttendanceRecord, AttendanceStatus};

/// Moves an `ABSENT` record to `EXCUSED` with its supporting evidence.
///
/// This is the only guarded post-creation status change; any other source
/// status is refused and the record is left untouched.
pub fn apply_justification(record: &mut AttendanceRecord, note: &str, document: Option<&str>) -> Result<(), AttendanceRejection> {
    if record.status != AttendanceStatus::Absent {
        return Err(AttendanceRejection::InvalidTransition {
            from: record.status,
            to: AttendanceStatus::Excused,
        });
    }

    record.status = AttendanceStatus::Excused;
    record.justified = true;
    record.justification_note = Some(note.trim().to_string());
    record.justification_document = document.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
    Ok(())
}

/// Whether a generic update would change status in a way the justification
/// workflow would refuse. Such updates are allowed but logged.
pub fn bypasses_justification_rule(from: AttendanceStatus, to: AttendanceStatus) -> bool {
    from != to && !(from == AttendanceStatus::Absent && to == AttendanceStatus::Excused)
}
