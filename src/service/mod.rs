pub mod attendance;
pub mod attendance_window;
pub mod class_session;
pub mod enrollment;
pub mod geolocation;
pub mod justification;
pub mod qr_code;
