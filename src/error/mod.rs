pub mod app_error;
pub mod attendance_rejection;
