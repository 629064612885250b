pub mod attendance;
pub mod class_session;
pub mod health;
pub mod student;
pub mod user;
