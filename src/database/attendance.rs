use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::attendance::{AttendanceRecord, AttendanceStatus, NewAttendanceRecord};
use std::future::Future;
use tracing::warn;
use uuid::Uuid;

/// Rounds of insert-then-lookup before giving up on a pair whose existing row
/// keeps disappearing between the two statements.
const INSERT_ATTEMPTS: usize = 3;

/// Result of the atomic check-and-insert on the (student, session) pair.
/// The losing side of a race sees `AlreadyExists`, never a database error.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Created(AttendanceRecord),
    AlreadyExists(AttendanceStatus),
}

#[async_trait::async_trait]
pub trait AttendanceRepository: Send + Sync {
    async fn find_attendance(&self, student_id: &Uuid, session_id: &Uuid) -> Result<Option<AttendanceRecord>, AppError>;
    /// Must reject the second of two racing inserts for the same pair.
    async fn insert_attendance(&self, record: &NewAttendanceRecord) -> Result<InsertOutcome, AppError>;
    async fn get_attendance_by_id(&self, id: &Uuid) -> Result<Option<AttendanceRecord>, AppError>;
    async fn list_attendance_for_session(&self, session_id: &Uuid) -> Result<Vec<AttendanceRecord>, AppError>;
    async fn list_attendance_for_student(&self, student_id: &Uuid) -> Result<Vec<AttendanceRecord>, AppError>;
    /// Writes status and justification fields back.
    async fn save_attendance(&self, record: &AttendanceRecord) -> Result<AttendanceRecord, AppError>;
    /// Stores the justification fields only while the stored status is still
    /// `ABSENT`. `None` when the record is gone or has already moved on.
    async fn justify_attendance(&self, record: &AttendanceRecord) -> Result<Option<AttendanceRecord>, AppError>;
    /// Returns false when no record had that id.
    async fn delete_attendance(&self, id: &Uuid) -> Result<bool, AppError>;
}

#[async_trait::async_trait]
impl AttendanceRepository for PostgresRepository {
    async fn find_attendance(&self, student_id: &Uuid, session_id: &Uuid) -> Result<Option<AttendanceRecord>, AppError> {
        let record = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            SELECT id, student_id, session_id, date, status, scanned_at, justified, justification_note,
                   justification_document, device_info, ip_address, origin
            FROM attendance_record
            WHERE student_id = $1 AND session_id = $2
            "#,
        )
        .bind(student_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_attendance(&self, record: &NewAttendanceRecord) -> Result<InsertOutcome, AppError> {
        settle_insert(|| self.try_insert_attendance(record), || self.existing_status(record)).await
    }

    async fn get_attendance_by_id(&self, id: &Uuid) -> Result<Option<AttendanceRecord>, AppError> {
        let record = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            SELECT id, student_id, session_id, date, status, scanned_at, justified, justification_note,
                   justification_document, device_info, ip_address, origin
            FROM attendance_record
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_attendance_for_session(&self, session_id: &Uuid) -> Result<Vec<AttendanceRecord>, AppError> {
        let records = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            SELECT id, student_id, session_id, date, status, scanned_at, justified, justification_note,
                   justification_document, device_info, ip_address, origin
            FROM attendance_record
            WHERE session_id = $1
            ORDER BY scanned_at
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_attendance_for_student(&self, student_id: &Uuid) -> Result<Vec<AttendanceRecord>, AppError> {
        let records = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            SELECT id, student_id, session_id, date, status, scanned_at, justified, justification_note,
                   justification_document, device_info, ip_address, origin
            FROM attendance_record
            WHERE student_id = $1
            ORDER BY date DESC, scanned_at DESC
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn save_attendance(&self, record: &AttendanceRecord) -> Result<AttendanceRecord, AppError> {
        let saved = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            UPDATE attendance_record
            SET status = $1, justified = $2, justification_note = $3, justification_document = $4, updated_at = now()
            WHERE id = $5
            RETURNING id, student_id, session_id, date, status, scanned_at, justified, justification_note,
                      justification_document, device_info, ip_address, origin
            "#,
        )
        .bind(record.status)
        .bind(record.justified)
        .bind(&record.justification_note)
        .bind(&record.justification_document)
        .bind(record.id)
        .fetch_optional(&self.pool)
        .await?;

        saved.ok_or_else(AppError::attendance_not_found)
    }

    async fn justify_attendance(&self, record: &AttendanceRecord) -> Result<Option<AttendanceRecord>, AppError> {
        let justified = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            UPDATE attendance_record
            SET status = 'EXCUSED', justified = true, justification_note = $1, justification_document = $2, updated_at = now()
            WHERE id = $3 AND status = 'ABSENT'
            RETURNING id, student_id, session_id, date, status, scanned_at, justified, justification_note,
                      justification_document, device_info, ip_address, origin
            "#,
        )
        .bind(&record.justification_note)
        .bind(&record.justification_document)
        .bind(record.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(justified)
    }

    async fn delete_attendance(&self, id: &Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM attendance_record WHERE id = $1").bind(id).execute(&self.pool).await?;

        Ok(result.rows_affected() > 0)
    }
}

impl PostgresRepository {
    /// `None` when the (student, session) pair already has a row.
    async fn try_insert_attendance(&self, record: &NewAttendanceRecord) -> Result<Option<AttendanceRecord>, AppError> {
        sqlx::query_as::<_, AttendanceRecord>(
            r#"
            INSERT INTO attendance_record (student_id, session_id, date, status, scanned_at, device_info, ip_address, origin)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (student_id, session_id) DO NOTHING
            RETURNING id, student_id, session_id, date, status, scanned_at, justified, justification_note,
                      justification_document, device_info, ip_address, origin
            "#,
        )
        .bind(record.student_id)
        .bind(record.session_id)
        .bind(record.date)
        .bind(record.status)
        .bind(record.scanned_at)
        .bind(&record.device_info)
        .bind(&record.ip_address)
        .bind(record.origin)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::db("Failed to create attendance record", e))
    }

    async fn existing_status(&self, record: &NewAttendanceRecord) -> Result<Option<AttendanceStatus>, AppError> {
        let status = sqlx::query_scalar("SELECT status FROM attendance_record WHERE student_id = $1 AND session_id = $2")
            .bind(record.student_id)
            .bind(record.session_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(status)
    }
}

/// Resolves a conflicting insert to the status of the row that won. When that
/// row is deleted before it can be read, the insert is tried again.
async fn settle_insert<I, IF, L, LF>(mut insert: I, mut lookup: L) -> Result<InsertOutcome, AppError>
where
    I: FnMut() -> IF,
    IF: Future<Output = Result<Option<AttendanceRecord>, AppError>>,
    L: FnMut() -> LF,
    LF: Future<Output = Result<Option<AttendanceStatus>, AppError>>,
{
    for attempt in 1..=INSERT_ATTEMPTS {
        if let Some(created) = insert().await? {
            return Ok(InsertOutcome::Created(created));
        }
        if let Some(status) = lookup().await? {
            return Ok(InsertOutcome::AlreadyExists(status));
        }
        warn!(attempt, "conflicting attendance record vanished before it could be read");
    }

    Err(AppError::db(
        "Failed to create attendance record",
        sqlx::Error::Protocol("conflicting attendance record kept disappearing".to_string()),
    ))
}
