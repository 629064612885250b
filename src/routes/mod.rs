pub mod attendance;
pub mod class_session;
pub mod error;
pub mod health;
pub mod student;
