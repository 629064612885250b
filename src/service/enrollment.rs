use crate::error::attendance_rejection::AttendanceRejection;
use crate::models::class_session::ClassSession;
use crate::models::student::Student;

/// A student may attend a session only through one of the session's groups.
pub fn ensure_enrolled(student: &Student, session: &ClassSession) -> Result<(), AttendanceRejection> {
    if session.group_ids.iter().any(|group_id| student.group_ids.contains(group_id)) {
        return Ok(());
    }

    Err(AttendanceRejection::NotEnrolled {
        student_id: student.id,
        session_id: session.id,
    })
}
