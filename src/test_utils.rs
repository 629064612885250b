use crate::database::attendance::{AttendanceRepository, InsertOutcome};
use crate::database::class_session::ClassSessionRepository;
use crate::database::student::StudentRepository;
use crate::error::app_error::AppError;
use crate::models::attendance::{AttendanceRecord, AttendanceStatus, NewAttendanceRecord};
use crate::models::class_session::ClassSession;
use crate::models::student::Student;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// In-memory stand-in for the PostgreSQL repository. The (student, session)
/// uniqueness is enforced under the records lock, like the database constraint.
#[derive(Default)]
pub struct InMemoryStore {
    pub sessions: Mutex<HashMap<Uuid, ClassSession>>,
    pub students: Mutex<HashMap<Uuid, Student>>,
    pub records: Mutex<Vec<AttendanceRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&self, session: ClassSession) {
        self.sessions.lock().unwrap().insert(session.id, session);
    }

    pub fn add_student(&self, student: Student) {
        self.students.lock().unwrap().insert(student.id, student);
    }

    pub fn session(&self, id: &Uuid) -> ClassSession {
        self.sessions.lock().unwrap().get(id).cloned().expect("session exists")
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ClassSessionRepository for InMemoryStore {
    async fn get_session_by_id(&self, id: &Uuid) -> Result<Option<ClassSession>, AppError> {
        Ok(self.sessions.lock().unwrap().get(id).cloned())
    }

    async fn update_session_qr(&self, session: &ClassSession) -> Result<(), AppError> {
        let mut sessions = self.sessions.lock().unwrap();
        let stored = sessions.get_mut(&session.id).ok_or_else(AppError::session_not_found)?;
        stored.qr_token = session.qr_token.clone();
        stored.qr_expires_at = session.qr_expires_at;
        stored.qr_image = session.qr_image.clone();
        stored.attendance_mode = session.attendance_mode;
        Ok(())
    }

    async fn mark_session_completed(&self, id: &Uuid) -> Result<(), AppError> {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(id) {
            session.completed = true;
            session.attendance_taken = true;
        }
        Ok(())
    }

    async fn mark_attendance_taken(&self, id: &Uuid) -> Result<(), AppError> {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(id) {
            session.attendance_taken = true;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StudentRepository for InMemoryStore {
    async fn get_student_by_id(&self, id: &Uuid) -> Result<Option<Student>, AppError> {
        Ok(self.students.lock().unwrap().get(id).cloned())
    }

    async fn get_student_by_cne(&self, cne: &str) -> Result<Option<Student>, AppError> {
        let cne = cne.trim();
        Ok(self.students.lock().unwrap().values().find(|s| s.cne == cne).cloned())
    }

    async fn list_students_for_session(&self, session_id: &Uuid) -> Result<Vec<Student>, AppError> {
        let group_ids = match self.sessions.lock().unwrap().get(session_id) {
            Some(session) => session.group_ids.clone(),
            None => return Ok(Vec::new()),
        };
        let mut students: Vec<Student> = self
            .students
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.group_ids.iter().any(|g| group_ids.contains(g)))
            .cloned()
            .collect();
        students.sort_by(|a, b| a.last_name.cmp(&b.last_name).then_with(|| a.first_name.cmp(&b.first_name)));
        Ok(students)
    }
}

#[async_trait::async_trait]
impl AttendanceRepository for InMemoryStore {
    async fn find_attendance(&self, student_id: &Uuid, session_id: &Uuid) -> Result<Option<AttendanceRecord>, AppError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| &r.student_id == student_id && &r.session_id == session_id)
            .cloned())
    }

    async fn insert_attendance(&self, record: &NewAttendanceRecord) -> Result<InsertOutcome, AppError> {
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records
            .iter()
            .find(|r| r.student_id == record.student_id && r.session_id == record.session_id)
        {
            return Ok(InsertOutcome::AlreadyExists(existing.status));
        }

        let created = AttendanceRecord {
            id: Uuid::new_v4(),
            student_id: record.student_id,
            session_id: record.session_id,
            date: record.date,
            status: record.status,
            scanned_at: record.scanned_at,
            justified: false,
            justification_note: None,
            justification_document: None,
            device_info: record.device_info.clone(),
            ip_address: record.ip_address.clone(),
            origin: record.origin,
        };
        records.push(created.clone());
        Ok(InsertOutcome::Created(created))
    }

    async fn get_attendance_by_id(&self, id: &Uuid) -> Result<Option<AttendanceRecord>, AppError> {
        Ok(self.records.lock().unwrap().iter().find(|r| &r.id == id).cloned())
    }

    async fn list_attendance_for_session(&self, session_id: &Uuid) -> Result<Vec<AttendanceRecord>, AppError> {
        Ok(self.records.lock().unwrap().iter().filter(|r| &r.session_id == session_id).cloned().collect())
    }

    async fn list_attendance_for_student(&self, student_id: &Uuid) -> Result<Vec<AttendanceRecord>, AppError> {
        Ok(self.records.lock().unwrap().iter().filter(|r| &r.student_id == student_id).cloned().collect())
    }

    async fn save_attendance(&self, record: &AttendanceRecord) -> Result<AttendanceRecord, AppError> {
        let mut records = self.records.lock().unwrap();
        let stored = records.iter_mut().find(|r| r.id == record.id).ok_or_else(AppError::attendance_not_found)?;
        stored.status = record.status;
        stored.justified = record.justified;
        stored.justification_note = record.justification_note.clone();
        stored.justification_document = record.justification_document.clone();
        Ok(stored.clone())
    }

    async fn justify_attendance(&self, record: &AttendanceRecord) -> Result<Option<AttendanceRecord>, AppError> {
        let mut records = self.records.lock().unwrap();
        let Some(stored) = records.iter_mut().find(|r| r.id == record.id && r.status == AttendanceStatus::Absent) else {
            return Ok(None);
        };
        stored.status = AttendanceStatus::Excused;
        stored.justified = true;
        stored.justification_note = record.justification_note.clone();
        stored.justification_document = record.justification_document.clone();
        Ok(Some(stored.clone()))
    }

    async fn delete_attendance(&self, id: &Uuid) -> Result<bool, AppError> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| &r.id != id);
        Ok(records.len() != before)
    }
}

/// Serves reads as another request saw them just before a concurrent writer
/// committed: existing records are invisible to `find_attendance`, and the
/// first `get_attendance_by_id` returns `snapshot` instead of the stored row.
/// Writes go straight to `inner`.
#[derive(Default)]
pub struct LaggingStore {
    pub inner: InMemoryStore,
    pub snapshot: Mutex<Option<AttendanceRecord>>,
}

impl LaggingStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            snapshot: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl ClassSessionRepository for LaggingStore {
    async fn get_session_by_id(&self, id: &Uuid) -> Result<Option<ClassSession>, AppError> {
        self.inner.get_session_by_id(id).await
    }

    async fn update_session_qr(&self, session: &ClassSession) -> Result<(), AppError> {
        self.inner.update_session_qr(session).await
    }

    async fn mark_session_completed(&self, id: &Uuid) -> Result<(), AppError> {
        self.inner.mark_session_completed(id).await
    }

    async fn mark_attendance_taken(&self, id: &Uuid) -> Result<(), AppError> {
        self.inner.mark_attendance_taken(id).await
    }
}

#[async_trait::async_trait]
impl StudentRepository for LaggingStore {
    async fn get_student_by_id(&self, id: &Uuid) -> Result<Option<Student>, AppError> {
        self.inner.get_student_by_id(id).await
    }

    async fn get_student_by_cne(&self, cne: &str) -> Result<Option<Student>, AppError> {
        self.inner.get_student_by_cne(cne).await
    }

    async fn list_students_for_session(&self, session_id: &Uuid) -> Result<Vec<Student>, AppError> {
        self.inner.list_students_for_session(session_id).await
    }
}

#[async_trait::async_trait]
impl AttendanceRepository for LaggingStore {
    async fn find_attendance(&self, _student_id: &Uuid, _session_id: &Uuid) -> Result<Option<AttendanceRecord>, AppError> {
        Ok(None)
    }

    async fn insert_attendance(&self, record: &NewAttendanceRecord) -> Result<InsertOutcome, AppError> {
        self.inner.insert_attendance(record).await
    }

    async fn get_attendance_by_id(&self, id: &Uuid) -> Result<Option<AttendanceRecord>, AppError> {
        let stale = self.snapshot.lock().unwrap().take_if(|r| &r.id == id);
        match stale {
            Some(record) => Ok(Some(record)),
            None => self.inner.get_attendance_by_id(id).await,
        }
    }

    async fn list_attendance_for_session(&self, session_id: &Uuid) -> Result<Vec<AttendanceRecord>, AppError> {
        self.inner.list_attendance_for_session(session_id).await
    }

    async fn list_attendance_for_student(&self, student_id: &Uuid) -> Result<Vec<AttendanceRecord>, AppError> {
        self.inner.list_attendance_for_student(student_id).await
    }

    async fn save_attendance(&self, record: &AttendanceRecord) -> Result<AttendanceRecord, AppError> {
        self.inner.save_attendance(record).await
    }

    async fn justify_attendance(&self, record: &AttendanceRecord) -> Result<Option<AttendanceRecord>, AppError> {
        self.inner.justify_attendance(record).await
    }

    async fn delete_attendance(&self, id: &Uuid) -> Result<bool, AppError> {
        self.inner.delete_attendance(id).await
    }
}
