use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::class_session::ClassSession;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait ClassSessionRepository: Send + Sync {
    async fn get_session_by_id(&self, id: &Uuid) -> Result<Option<ClassSession>, AppError>;
    /// Persists token, expiry, image and mode. Last writer wins.
    async fn update_session_qr(&self, session: &ClassSession) -> Result<(), AppError>;
    async fn mark_session_completed(&self, id: &Uuid) -> Result<(), AppError>;
    async fn mark_attendance_taken(&self, id: &Uuid) -> Result<(), AppError>;
}

#[async_trait::async_trait]
impl ClassSessionRepository for PostgresRepository {
    async fn get_session_by_id(&self, id: &Uuid) -> Result<Option<ClassSession>, AppError> {
        let session = sqlx::query_as::<_, ClassSession>(
            r#"
            SELECT
                s.id,
                s.start_time,
                s.duration_minutes::BIGINT AS duration_minutes,
                s.completed,
                s.attendance_taken,
                s.attendance_mode,
                s.qr_token,
                s.qr_expires_at,
                s.qr_image,
                ARRAY(SELECT sg.group_id FROM session_group sg WHERE sg.session_id = s.id) AS group_ids
            FROM class_session s
            WHERE s.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn update_session_qr(&self, session: &ClassSession) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE class_session
            SET qr_token = $1, qr_expires_at = $2, qr_image = $3, attendance_mode = $4, updated_at = now()
            WHERE id = $5
            "#,
        )
        .bind(&session.qr_token)
        .bind(session.qr_expires_at)
        .bind(&session.qr_image)
        .bind(session.attendance_mode)
        .bind(session.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::session_not_found());
        }

        Ok(())
    }

    async fn mark_session_completed(&self, id: &Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE class_session SET completed = true, attendance_taken = true, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_attendance_taken(&self, id: &Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE class_session SET attendance_taken = true, updated_at = now() WHERE id = $1 AND NOT attendance_taken")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
