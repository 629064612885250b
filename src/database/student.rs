use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::student::Student;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait StudentRepository: Send + Sync {
    async fn get_student_by_id(&self, id: &Uuid) -> Result<Option<Student>, AppError>;
    async fn get_student_by_cne(&self, cne: &str) -> Result<Option<Student>, AppError>;
    /// Students belonging to at least one group attached to the session.
    async fn list_students_for_session(&self, session_id: &Uuid) -> Result<Vec<Student>, AppError>;
}

#[async_trait::async_trait]
impl StudentRepository for PostgresRepository {
    async fn get_student_by_id(&self, id: &Uuid) -> Result<Option<Student>, AppError> {
        let student = sqlx::query_as::<_, Student>(
            r#"
            SELECT
                st.id,
                st.cne,
                st.first_name,
                st.last_name,
                ARRAY(SELECT gm.group_id FROM group_member gm WHERE gm.student_id = st.id) AS group_ids
            FROM student st
            WHERE st.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(student)
    }

    async fn get_student_by_cne(&self, cne: &str) -> Result<Option<Student>, AppError> {
        let student = sqlx::query_as::<_, Student>(
            r#"
            SELECT
                st.id,
                st.cne,
                st.first_name,
                st.last_name,
                ARRAY(SELECT gm.group_id FROM group_member gm WHERE gm.student_id = st.id) AS group_ids
            FROM student st
            WHERE st.cne = $1
            "#,
        )
        .bind(cne.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(student)
    }

    async fn list_students_for_session(&self, session_id: &Uuid) -> Result<Vec<Student>, AppError> {
        let students = sqlx::query_as::<_, Student>(
            r#"
            SELECT
                st.id,
                st.cne,
                st.first_name,
                st.last_name,
                ARRAY(SELECT gm.group_id FROM group_member gm WHERE gm.student_id = st.id) AS group_ids
            FROM student st
            WHERE EXISTS (
                SELECT 1
                FROM group_member gm
                JOIN session_group sg ON sg.group_id = gm.group_id
                WHERE gm.student_id = st.id AND sg.session_id = $1
            )
            ORDER BY st.last_name, st.first_name
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(students)
    }
}
