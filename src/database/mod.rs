pub mod attendance;
pub mod class_session;
pub mod postgres_repository;
pub mod student;
pub mod user_session;

use crate::database::attendance::AttendanceRepository;
use crate::database::class_session::ClassSessionRepository;
use crate::database::student::StudentRepository;

/// Everything the attendance engine reads and writes.
pub trait AttendanceStore: ClassSessionRepository + StudentRepository + AttendanceRepository {}

impl<T> AttendanceStore for T where T: ClassSessionRepository + StudentRepository + AttendanceRepository {}
