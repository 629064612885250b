use crate::config::AttendanceConfig;
use crate::database::AttendanceStore;
use crate::database::attendance::InsertOutcome;
use crate::error::app_error::AppError;
use crate::error::attendance_rejection::AttendanceRejection;
use crate::models::attendance::{
    AttendanceOrigin, AttendanceRecord, AttendanceStatus, AttendanceSummaryResponse, AttendanceUpdateRequest, BulkAttendanceResponse,
    BulkItemFailure, NewAttendanceRecord, ScanMetadata,
};
use crate::models::class_session::{AttendanceMode, ClassSession};
use crate::models::student::Student;
use crate::service::attendance_window::AttendanceWindow;
use crate::service::enrollment::ensure_enrolled;
use crate::service::geolocation::CampusFence;
use crate::service::justification::{apply_justification, bypasses_justification_rule};
use crate::service::qr_code::{SessionQrPayload, StudentQrPayload, is_qr_valid};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How the scanned student and session are identified.
#[derive(Debug, Clone)]
pub enum ScanIdentity {
    /// A professor types the student's CNE.
    ByCode { session_id: Uuid, cne: String },
    /// A professor scans the student's personal QR card.
    ByStudentQr { session_id: Uuid, student_id: Uuid, payload: String },
    /// A signed-in student scans the QR code displayed for the session.
    BySessionQr { student_id: Uuid, payload: String },
}

impl ScanIdentity {
    fn origin(&self) -> AttendanceOrigin {
        match self {
            ScanIdentity::ByCode { .. } | ScanIdentity::ByStudentQr { .. } => AttendanceOrigin::Professor,
            ScanIdentity::BySessionQr { .. } => AttendanceOrigin::Student,
        }
    }

    fn path(&self) -> &'static str {
        match self {
            ScanIdentity::ByCode { .. } => "code",
            ScanIdentity::ByStudentQr { .. } => "student_qr",
            ScanIdentity::BySessionQr { .. } => "session_qr",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub identity: ScanIdentity,
    pub metadata: ScanMetadata,
}

struct ResolvedScan {
    student: Student,
    session: ClassSession,
    /// Present only on the session-QR path.
    scanned_token: Option<String>,
}

/// Decides whether a scan becomes an attendance record.
///
/// Every path runs the same gates in the same order and stops at the first
/// failure: identity, mode/token (session QR only), completion, timing,
/// enrollment, duplicate, location, then status assignment and insert.
pub struct AttendanceService<'a, S: AttendanceStore + ?Sized> {
    store: &'a S,
    config: &'a AttendanceConfig,
}

impl<'a, S: AttendanceStore + ?Sized> AttendanceService<'a, S> {
    pub fn new(store: &'a S, config: &'a AttendanceConfig) -> Self {
        Self { store, config }
    }

    pub async fn record_scan(&self, request: ScanRequest, now: DateTime<Utc>) -> Result<AttendanceRecord, AppError> {
        let path = request.identity.path();
        let result = self.run_scan_pipeline(request, now).await;

        match &result {
            Ok(record) => info!(
                path,
                student_id = %record.student_id,
                session_id = %record.session_id,
                status = %record.status,
                "attendance recorded"
            ),
            Err(AppError::Rejected(rejection)) => warn!(path, kind = rejection.kind(), reason = %rejection, "scan rejected"),
            Err(err) => warn!(path, error = %err, "scan failed"),
        }

        result
    }

    async fn run_scan_pipeline(&self, request: ScanRequest, now: DateTime<Utc>) -> Result<AttendanceRecord, AppError> {
        let origin = request.identity.origin();
        let ResolvedScan {
            student,
            session,
            scanned_token,
        } = self.resolve(request.identity).await?;

        if let Some(token) = scanned_token {
            check_session_token(&session, &token, now)?;
        }

        ensure_not_completed(&session)?;

        let window = AttendanceWindow::for_session(&session, self.config);
        window.check(now)?;

        ensure_enrolled(&student, &session)?;

        self.ensure_not_recorded(&student.id, &session.id).await?;

        if let Some(distance_km) = CampusFence::from_config(self.config).check_optional(request.metadata.latitude, request.metadata.longitude)? {
            debug!(student_id = %student.id, distance_km, "scan location verified");
        }

        let status = window.classify(now);
        let record = self
            .insert(NewAttendanceRecord {
                student_id: student.id,
                session_id: session.id,
                date: session.start_time.date_naive(),
                status,
                scanned_at: now,
                device_info: request.metadata.device_info,
                ip_address: request.metadata.ip_address,
                origin,
            })
            .await?;

        if !session.attendance_taken {
            self.store.mark_attendance_taken(&session.id).await?;
        }

        Ok(record)
    }

    async fn resolve(&self, identity: ScanIdentity) -> Result<ResolvedScan, AppError> {
        match identity {
            ScanIdentity::ByCode { session_id, cne } => {
                let student = self.store.get_student_by_cne(&cne).await?.ok_or_else(AppError::student_not_found)?;
                let session = self.load_session(&session_id).await?;
                Ok(ResolvedScan {
                    student,
                    session,
                    scanned_token: None,
                })
            }
            ScanIdentity::ByStudentQr {
                session_id,
                student_id,
                payload,
            } => {
                let parsed: StudentQrPayload = payload.parse()?;
                if parsed.student_id != student_id {
                    return Err(AttendanceRejection::PayloadMismatch { student_id }.into());
                }
                let student = self.load_student(&student_id).await?;
                if student.cne != parsed.cne {
                    return Err(AttendanceRejection::PayloadMismatch { student_id }.into());
                }
                let session = self.load_session(&session_id).await?;
                Ok(ResolvedScan {
                    student,
                    session,
                    scanned_token: None,
                })
            }
            ScanIdentity::BySessionQr { student_id, payload } => {
                let parsed: SessionQrPayload = payload.parse()?;
                let session = self.load_session(&parsed.session_id).await?;
                let student = self.load_student(&student_id).await?;
                Ok(ResolvedScan {
                    student,
                    session,
                    scanned_token: Some(payload.trim().to_string()),
                })
            }
        }
    }

    /// Administrator entry: skips mode, timing, enrollment and location
    /// checks but still refuses completed sessions and duplicates.
    pub async fn record_manual(
        &self,
        session_id: &Uuid,
        student_id: &Uuid,
        status: AttendanceStatus,
        metadata: ScanMetadata,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord, AppError> {
        let session = self.load_session(session_id).await?;
        let student = self.load_student(student_id).await?;

        ensure_not_completed(&session)?;
        self.ensure_not_recorded(&student.id, &session.id).await?;

        let record = self
            .insert(NewAttendanceRecord {
                student_id: student.id,
                session_id: session.id,
                date: session.start_time.date_naive(),
                status,
                scanned_at: now,
                device_info: metadata.device_info,
                ip_address: metadata.ip_address,
                origin: AttendanceOrigin::Manual,
            })
            .await?;

        info!(student_id = %student.id, session_id = %session.id, status = %status, "manual attendance recorded");
        Ok(record)
    }

    /// Records `status` for every listed student. Students already recorded
    /// are skipped and per-student failures are collected; the batch itself
    /// only fails when the session is missing or completed.
    pub async fn record_bulk(
        &self,
        session_id: &Uuid,
        status: AttendanceStatus,
        student_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<BulkAttendanceResponse, AppError> {
        let session = self.load_session(session_id).await?;
        ensure_not_completed(&session)?;

        let mut summary = BulkAttendanceResponse::default();
        let mut seen = HashSet::new();

        for student_id in student_ids.iter().filter(|id| seen.insert(**id)) {
            match self.record_bulk_item(&session, student_id, status, now).await {
                Ok(true) => summary.recorded += 1,
                Ok(false) => summary.skipped += 1,
                Err(err) => summary.failed.push(BulkItemFailure {
                    student_id: *student_id,
                    reason: err.to_string(),
                }),
            }
        }

        info!(
            session_id = %session.id,
            status = %status,
            recorded = summary.recorded,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            "bulk attendance processed"
        );

        Ok(summary)
    }

    /// `Ok(false)` means the student already had a record.
    async fn record_bulk_item(&self, session: &ClassSession, student_id: &Uuid, status: AttendanceStatus, now: DateTime<Utc>) -> Result<bool, AppError> {
        let student = self.load_student(student_id).await?;
        if self.store.find_attendance(&student.id, &session.id).await?.is_some() {
            return Ok(false);
        }

        let outcome = self
            .store
            .insert_attendance(&NewAttendanceRecord {
                student_id: student.id,
                session_id: session.id,
                date: session.start_time.date_naive(),
                status,
                scanned_at: now,
                device_info: None,
                ip_address: None,
                origin: AttendanceOrigin::Manual,
            })
            .await?;

        Ok(matches!(outcome, InsertOutcome::Created(_)))
    }

    /// Marks the session completed and records every enrolled student
    /// without a record as `ABSENT`. Returns how many were marked absent.
    pub async fn complete_session(&self, session_id: &Uuid, now: DateTime<Utc>) -> Result<usize, AppError> {
        let session = self.load_session(session_id).await?;
        ensure_not_completed(&session)?;

        let recorded: HashSet<Uuid> = self
            .store
            .list_attendance_for_session(&session.id)
            .await?
            .into_iter()
            .map(|record| record.student_id)
            .collect();

        let mut marked_absent = 0;
        for student in self.store.list_students_for_session(&session.id).await? {
            if recorded.contains(&student.id) {
                continue;
            }
            let outcome = self
                .store
                .insert_attendance(&NewAttendanceRecord {
                    student_id: student.id,
                    session_id: session.id,
                    date: session.start_time.date_naive(),
                    status: AttendanceStatus::Absent,
                    scanned_at: now,
                    device_info: None,
                    ip_address: None,
                    origin: AttendanceOrigin::Manual,
                })
                .await?;
            if matches!(outcome, InsertOutcome::Created(_)) {
                marked_absent += 1;
            }
        }

        self.store.mark_session_completed(&session.id).await?;
        info!(session_id = %session.id, marked_absent, "session completed");
        Ok(marked_absent)
    }

    pub async fn justify(&self, record_id: &Uuid, note: &str, document: Option<&str>) -> Result<AttendanceRecord, AppError> {
        let mut record = self.load_record(record_id).await?;
        apply_justification(&mut record, note, document)?;

        // The store re-checks ABSENT, so a status change committed since the
        // read above is never overwritten.
        let Some(saved) = self.store.justify_attendance(&record).await? else {
            let current = self.load_record(record_id).await?;
            warn!(record_id = %current.id, status = %current.status, "record changed before it could be justified");
            return Err(AttendanceRejection::InvalidTransition {
                from: current.status,
                to: AttendanceStatus::Excused,
            }
            .into());
        };
        info!(record_id = %saved.id, student_id = %saved.student_id, "absence justified");
        Ok(saved)
    }

    /// Administrative correction. Any status change is accepted; changes the
    /// justification workflow would refuse are logged.
    pub async fn update_attendance(&self, record_id: &Uuid, update: AttendanceUpdateRequest) -> Result<AttendanceRecord, AppError> {
        let mut record = self.load_record(record_id).await?;

        if bypasses_justification_rule(record.status, update.status) {
            warn!(
                record_id = %record.id,
                from = %record.status,
                to = %update.status,
                "attendance status changed outside the justification workflow"
            );
        }

        record.status = update.status;
        record.justified = update.justified;
        record.justification_note = update.justification_note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        record.justification_document = update.justification_document.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());

        self.store.save_attendance(&record).await
    }

    pub async fn delete_attendance(&self, record_id: &Uuid) -> Result<(), AppError> {
        if !self.store.delete_attendance(record_id).await? {
            return Err(AppError::attendance_not_found());
        }
        info!(record_id = %record_id, "attendance record deleted");
        Ok(())
    }

    pub async fn get_attendance(&self, record_id: &Uuid) -> Result<AttendanceRecord, AppError> {
        self.load_record(record_id).await
    }

    pub async fn list_for_session(&self, session_id: &Uuid) -> Result<Vec<AttendanceRecord>, AppError> {
        let session = self.load_session(session_id).await?;
        self.store.list_attendance_for_session(&session.id).await
    }

    pub async fn list_for_student(&self, student_id: &Uuid) -> Result<Vec<AttendanceRecord>, AppError> {
        let student = self.load_student(student_id).await?;
        self.store.list_attendance_for_student(&student.id).await
    }

    /// Per-status counts over every record of the session, plus how many
    /// enrolled students have no record yet.
    pub async fn session_summary(&self, session_id: &Uuid) -> Result<AttendanceSummaryResponse, AppError> {
        let session = self.load_session(session_id).await?;
        let records = self.store.list_attendance_for_session(&session.id).await?;
        let enrolled = self.store.list_students_for_session(&session.id).await?;

        let mut summary = AttendanceSummaryResponse {
            session_id: session.id,
            enrolled: enrolled.len(),
            ..AttendanceSummaryResponse::default()
        };
        for record in &records {
            match record.status {
                AttendanceStatus::Present => summary.present += 1,
                AttendanceStatus::Late => summary.late += 1,
                AttendanceStatus::Absent => summary.absent += 1,
                AttendanceStatus::Excused => summary.excused += 1,
                AttendanceStatus::CatchingUp => summary.catching_up += 1,
            }
        }

        let recorded: HashSet<Uuid> = records.iter().map(|r| r.student_id).collect();
        summary.unrecorded = enrolled.iter().filter(|s| !recorded.contains(&s.id)).count();
        Ok(summary)
    }

    async fn load_record(&self, id: &Uuid) -> Result<AttendanceRecord, AppError> {
        self.store.get_attendance_by_id(id).await?.ok_or_else(AppError::attendance_not_found)
    }

    async fn ensure_not_recorded(&self, student_id: &Uuid, session_id: &Uuid) -> Result<(), AppError> {
        if let Some(existing) = self.store.find_attendance(student_id, session_id).await? {
            return Err(AttendanceRejection::AlreadyRecorded { status: existing.status }.into());
        }
        Ok(())
    }

    /// The store settles races between concurrent scans of the same pair.
    async fn insert(&self, record: NewAttendanceRecord) -> Result<AttendanceRecord, AppError> {
        match self.store.insert_attendance(&record).await? {
            InsertOutcome::Created(created) => Ok(created),
            InsertOutcome::AlreadyExists(status) => Err(AttendanceRejection::AlreadyRecorded { status }.into()),
        }
    }

    async fn load_session(&self, id: &Uuid) -> Result<ClassSession, AppError> {
        self.store.get_session_by_id(id).await?.ok_or_else(AppError::session_not_found)
    }

    async fn load_student(&self, id: &Uuid) -> Result<Student, AppError> {
        self.store.get_student_by_id(id).await?.ok_or_else(AppError::student_not_found)
    }
}

fn check_session_token(session: &ClassSession, scanned: &str, now: DateTime<Utc>) -> Result<(), AttendanceRejection> {
    if session.attendance_mode != AttendanceMode::StudentScan {
        return Err(AttendanceRejection::WrongMode {
            mode: session.attendance_mode,
        });
    }
    if session.qr_token.as_deref() != Some(scanned) {
        return Err(AttendanceRejection::TokenMismatch);
    }
    if !is_qr_valid(session, now) {
        return Err(AttendanceRejection::TokenExpired {
            expired_at: session.qr_expires_at,
        });
    }
    Ok(())
}

fn ensure_not_completed(session: &ClassSession) -> Result<(), AttendanceRejection> {
    if session.completed {
        return Err(AttendanceRejection::SessionCompleted { session_id: session.id });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::attendance::AttendanceRepository;
    use crate::service::qr_code::{QrCodeIssuer, SvgQrRenderer};
    use crate::test_utils::{InMemoryStore, LaggingStore};
    use chrono::{Duration, TimeZone};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 7, hour, minute, 0).unwrap()
    }

    struct Fixture {
        store: InMemoryStore,
        config: AttendanceConfig,
        session_id: Uuid,
        group_id: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            let store = InMemoryStore::new();
            let group_id = Uuid::new_v4();
            let session_id = Uuid::new_v4();
            store.add_session(ClassSession {
                id: session_id,
                start_time: at(10, 0),
                duration_minutes: 90,
                group_ids: vec![group_id],
                ..ClassSession::default()
            });
            Self {
                store,
                config: AttendanceConfig::default(),
                session_id,
                group_id,
            }
        }

        fn student(&self, cne: &str, enrolled: bool) -> Student {
            let student = Student {
                id: Uuid::new_v4(),
                cne: cne.to_string(),
                first_name: "Amina".to_string(),
                last_name: cne.to_string(),
                group_ids: if enrolled { vec![self.group_id] } else { vec![Uuid::new_v4()] },
            };
            self.store.add_student(student.clone());
            student
        }

        fn service(&self) -> AttendanceService<'_, InMemoryStore> {
            AttendanceService::new(&self.store, &self.config)
        }

        fn by_code(&self, cne: &str) -> ScanRequest {
            ScanRequest {
                identity: ScanIdentity::ByCode {
                    session_id: self.session_id,
                    cne: cne.to_string(),
                },
                metadata: ScanMetadata::default(),
            }
        }

        fn activate_student_scan(&self, now: DateTime<Utc>) -> String {
            let mut session = self.store.session(&self.session_id);
            let issuer = QrCodeIssuer::new(&self.config, &SvgQrRenderer);
            issuer.activate(&mut session, 30, now).unwrap();
            let token = session.qr_token.clone().unwrap();
            self.store.add_session(session);
            token
        }
    }

    fn rejection(result: Result<AttendanceRecord, AppError>) -> AttendanceRejection {
        match result {
            Err(AppError::Rejected(rejection)) => rejection,
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[rocket::async_test]
    async fn scenario_from_opening_to_grace_period() {
        let fixture = Fixture::new();
        let first = fixture.student("A100", true);
        let second = fixture.student("A200", true);
        let third = fixture.student("A300", true);
        let fourth = fixture.student("A400", true);
        let service = fixture.service();

        let record = service.record_scan(fixture.by_code("A100"), at(9, 50)).await.unwrap();
        assert_eq!(record.status, AttendanceStatus::Present);
        assert_eq!(record.student_id, first.id);
        assert_eq!(record.origin, AttendanceOrigin::Professor);

        let record = service.record_scan(fixture.by_code("A200"), at(10, 20)).await.unwrap();
        assert_eq!(record.status, AttendanceStatus::Late);
        assert_eq!(record.student_id, second.id);

        let again = service.record_scan(fixture.by_code("A100"), at(10, 5)).await;
        assert_eq!(
            rejection(again),
            AttendanceRejection::AlreadyRecorded {
                status: AttendanceStatus::Present
            }
        );

        let too_late = rejection(service.record_scan(fixture.by_code("A300"), at(12, 25)).await);
        assert!(matches!(too_late, AttendanceRejection::TooLate { .. }));

        let record = service.record_scan(fixture.by_code("A400"), at(11, 45)).await.unwrap();
        assert_eq!(record.status, AttendanceStatus::Late);
        assert_eq!(record.student_id, fourth.id);

        assert!(fixture.store.find_attendance(&third.id, &fixture.session_id).await.unwrap().is_none());
        assert!(fixture.store.session(&fixture.session_id).attendance_taken);
    }

    #[rocket::async_test]
    async fn scan_before_window_is_too_early() {
        let fixture = Fixture::new();
        fixture.student("A100", true);
        let result = fixture.service().record_scan(fixture.by_code("A100"), at(9, 40)).await;
        match rejection(result) {
            AttendanceRejection::TooEarly { opens_at, remaining } => {
                assert_eq!(opens_at, at(9, 45));
                assert_eq!(remaining, "5 min");
            }
            other => panic!("unexpected rejection: {other:?}"),
        }
    }

    #[rocket::async_test]
    async fn unknown_cne_is_a_lookup_failure() {
        let fixture = Fixture::new();
        let result = fixture.service().record_scan(fixture.by_code("NOPE"), at(10, 0)).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[rocket::async_test]
    async fn unknown_session_is_a_lookup_failure() {
        let fixture = Fixture::new();
        fixture.student("A100", true);
        let request = ScanRequest {
            identity: ScanIdentity::ByCode {
                session_id: Uuid::new_v4(),
                cne: "A100".to_string(),
            },
            metadata: ScanMetadata::default(),
        };
        let result = fixture.service().record_scan(request, at(10, 0)).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[rocket::async_test]
    async fn unenrolled_student_is_never_reported_as_duplicate() {
        let fixture = Fixture::new();
        let outsider = fixture.student("X999", false);
        // Even with a record already present, enrollment is checked first.
        fixture
            .service()
            .record_manual(&fixture.session_id, &outsider.id, AttendanceStatus::Present, ScanMetadata::default(), at(9, 0))
            .await
            .unwrap();

        for _ in 0..2 {
            let result = fixture.service().record_scan(fixture.by_code("X999"), at(10, 0)).await;
            assert!(matches!(rejection(result), AttendanceRejection::NotEnrolled { .. }));
        }
    }

    #[rocket::async_test]
    async fn completed_session_refuses_scans() {
        let fixture = Fixture::new();
        fixture.student("A100", true);
        let mut session = fixture.store.session(&fixture.session_id);
        session.completed = true;
        fixture.store.add_session(session);

        let result = fixture.service().record_scan(fixture.by_code("A100"), at(10, 0)).await;
        assert!(matches!(rejection(result), AttendanceRejection::SessionCompleted { .. }));
    }

    #[rocket::async_test]
    async fn student_qr_scan_checks_embedded_cne() {
        let fixture = Fixture::new();
        let student = fixture.student("A100", true);
        let service = fixture.service();

        let forged = ScanRequest {
            identity: ScanIdentity::ByStudentQr {
                session_id: fixture.session_id,
                student_id: student.id,
                payload: format!("STUDENT:{}:OTHER", student.id),
            },
            metadata: ScanMetadata::default(),
        };
        assert!(matches!(
            rejection(service.record_scan(forged, at(10, 0)).await),
            AttendanceRejection::PayloadMismatch { .. }
        ));

        let genuine = ScanRequest {
            identity: ScanIdentity::ByStudentQr {
                session_id: fixture.session_id,
                student_id: student.id,
                payload: StudentQrPayload::for_student(&student).to_string(),
            },
            metadata: ScanMetadata::default(),
        };
        let record = service.record_scan(genuine, at(10, 0)).await.unwrap();
        assert_eq!(record.origin, AttendanceOrigin::Professor);
        assert_eq!(record.status, AttendanceStatus::Present);
    }

    #[rocket::async_test]
    async fn student_qr_for_another_student_is_a_mismatch() {
        let fixture = Fixture::new();
        let student = fixture.student("A100", true);
        let other = fixture.student("A200", true);
        let request = ScanRequest {
            identity: ScanIdentity::ByStudentQr {
                session_id: fixture.session_id,
                student_id: student.id,
                payload: StudentQrPayload::for_student(&other).to_string(),
            },
            metadata: ScanMetadata::default(),
        };
        assert!(matches!(
            rejection(fixture.service().record_scan(request, at(10, 0)).await),
            AttendanceRejection::PayloadMismatch { .. }
        ));
    }

    #[rocket::async_test]
    async fn malformed_payload_is_rejected() {
        let fixture = Fixture::new();
        let student = fixture.student("A100", true);
        let request = ScanRequest {
            identity: ScanIdentity::BySessionQr {
                student_id: student.id,
                payload: "garbage".to_string(),
            },
            metadata: ScanMetadata::default(),
        };
        assert!(matches!(
            rejection(fixture.service().record_scan(request, at(10, 0)).await),
            AttendanceRejection::InvalidPayload { .. }
        ));
    }

    #[rocket::async_test]
    async fn session_qr_requires_student_scan_mode() {
        let fixture = Fixture::new();
        let student = fixture.student("A100", true);
        let mut session = fixture.store.session(&fixture.session_id);
        let issuer = QrCodeIssuer::new(&fixture.config, &SvgQrRenderer);
        let token = issuer.issue(&mut session, at(9, 0)).unwrap();
        fixture.store.add_session(session);

        let request = ScanRequest {
            identity: ScanIdentity::BySessionQr {
                student_id: student.id,
                payload: token,
            },
            metadata: ScanMetadata::default(),
        };
        assert_eq!(
            rejection(fixture.service().record_scan(request, at(10, 0)).await),
            AttendanceRejection::WrongMode {
                mode: AttendanceMode::Manual
            }
        );
    }

    #[rocket::async_test]
    async fn session_qr_scan_records_student_origin() {
        let fixture = Fixture::new();
        let student = fixture.student("A100", true);
        let token = fixture.activate_student_scan(at(9, 55));

        let request = ScanRequest {
            identity: ScanIdentity::BySessionQr {
                student_id: student.id,
                payload: token,
            },
            metadata: ScanMetadata {
                device_info: Some("Pixel 8".to_string()),
                ip_address: Some("10.0.0.7".to_string()),
                latitude: None,
                longitude: None,
            },
        };
        let record = fixture.service().record_scan(request, at(10, 5)).await.unwrap();
        assert_eq!(record.origin, AttendanceOrigin::Student);
        assert_eq!(record.status, AttendanceStatus::Present);
        assert_eq!(record.device_info.as_deref(), Some("Pixel 8"));
        assert_eq!(record.ip_address.as_deref(), Some("10.0.0.7"));
    }

    #[rocket::async_test]
    async fn regenerated_token_makes_old_token_mismatch() {
        let fixture = Fixture::new();
        let student = fixture.student("A100", true);
        let old_token = fixture.activate_student_scan(at(9, 55));

        let mut session = fixture.store.session(&fixture.session_id);
        QrCodeIssuer::new(&fixture.config, &SvgQrRenderer).regenerate(&mut session, at(10, 0)).unwrap();
        fixture.store.add_session(session);

        let request = ScanRequest {
            identity: ScanIdentity::BySessionQr {
                student_id: student.id,
                payload: old_token,
            },
            metadata: ScanMetadata::default(),
        };
        assert_eq!(
            rejection(fixture.service().record_scan(request, at(10, 1)).await),
            AttendanceRejection::TokenMismatch
        );
    }

    #[rocket::async_test]
    async fn expired_token_is_rejected_even_inside_window() {
        let fixture = Fixture::new();
        let student = fixture.student("A100", true);
        let token = fixture.activate_student_scan(at(9, 50));

        let request = ScanRequest {
            identity: ScanIdentity::BySessionQr {
                student_id: student.id,
                payload: token,
            },
            metadata: ScanMetadata::default(),
        };
        assert_eq!(
            rejection(fixture.service().record_scan(request, at(10, 21)).await),
            AttendanceRejection::TokenExpired {
                expired_at: Some(at(10, 20))
            }
        );
    }

    #[rocket::async_test]
    async fn far_away_scan_is_out_of_range() {
        let fixture = Fixture::new();
        fixture.student("A100", true);
        fixture.student("A200", true);
        let service = fixture.service();
        let degrees_per_km = (1.0f64 / 6371.0).to_degrees();

        let mut far = fixture.by_code("A100");
        far.metadata.latitude = Some(fixture.config.campus_latitude + 0.6 * degrees_per_km);
        far.metadata.longitude = Some(fixture.config.campus_longitude);
        assert!(matches!(
            rejection(service.record_scan(far, at(10, 0)).await),
            AttendanceRejection::OutOfRange { .. }
        ));

        let mut near = fixture.by_code("A200");
        near.metadata.latitude = Some(fixture.config.campus_latitude + 0.3 * degrees_per_km);
        near.metadata.longitude = Some(fixture.config.campus_longitude);
        assert!(service.record_scan(near, at(10, 0)).await.is_ok());
    }

    #[rocket::async_test]
    async fn second_scan_is_rejected_on_every_path() {
        let fixture = Fixture::new();
        let student = fixture.student("A100", true);
        let token = fixture.activate_student_scan(at(9, 50));
        let service = fixture.service();

        service.record_scan(fixture.by_code("A100"), at(10, 0)).await.unwrap();

        let by_student_qr = ScanRequest {
            identity: ScanIdentity::ByStudentQr {
                session_id: fixture.session_id,
                student_id: student.id,
                payload: StudentQrPayload::for_student(&student).to_string(),
            },
            metadata: ScanMetadata::default(),
        };
        let by_session_qr = ScanRequest {
            identity: ScanIdentity::BySessionQr {
                student_id: student.id,
                payload: token,
            },
            metadata: ScanMetadata::default(),
        };

        for request in [fixture.by_code("A100"), by_student_qr, by_session_qr] {
            assert_eq!(
                rejection(service.record_scan(request, at(10, 2)).await),
                AttendanceRejection::AlreadyRecorded {
                    status: AttendanceStatus::Present
                }
            );
        }
        assert_eq!(fixture.store.record_count(), 1);
    }

    #[rocket::async_test]
    async fn joined_scans_produce_one_record() {
        let fixture = Fixture::new();
        fixture.student("A100", true);
        let service = fixture.service();

        let (first, second) = tokio::join!(
            service.record_scan(fixture.by_code("A100"), at(10, 0)),
            service.record_scan(fixture.by_code("A100"), at(10, 0))
        );

        assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(fixture.store.record_count(), 1);
    }

    #[rocket::async_test]
    async fn scan_losing_the_insert_race_is_already_recorded() {
        let fixture = Fixture::new();
        fixture.student("A100", true);
        let (first, second) = (fixture.by_code("A100"), fixture.by_code("A100"));
        let store = LaggingStore::new(fixture.store);
        let service = AttendanceService::new(&store, &fixture.config);

        service.record_scan(first, at(10, 0)).await.unwrap();
        // The duplicate check sees no record, as if both scans read before either wrote.
        let second = service.record_scan(second, at(10, 20)).await;

        assert_eq!(
            rejection(second),
            AttendanceRejection::AlreadyRecorded {
                status: AttendanceStatus::Present
            }
        );
        assert_eq!(store.inner.record_count(), 1);
    }

    #[rocket::async_test]
    async fn manual_entry_skips_timing_but_not_duplicates() {
        let fixture = Fixture::new();
        let student = fixture.student("A100", true);
        let service = fixture.service();
        let long_after = at(10, 0) + Duration::days(2);

        let record = service
            .record_manual(&fixture.session_id, &student.id, AttendanceStatus::CatchingUp, ScanMetadata::default(), long_after)
            .await
            .unwrap();
        assert_eq!(record.origin, AttendanceOrigin::Manual);
        assert_eq!(record.status, AttendanceStatus::CatchingUp);

        let again = service
            .record_manual(&fixture.session_id, &student.id, AttendanceStatus::Present, ScanMetadata::default(), long_after)
            .await;
        assert!(matches!(rejection(again), AttendanceRejection::AlreadyRecorded { .. }));
    }

    #[rocket::async_test]
    async fn bulk_skips_recorded_students_and_reports_failures() {
        let fixture = Fixture::new();
        let already = fixture.student("A100", true);
        let fresh = fixture.student("A200", true);
        let outsider = fixture.student("X300", false);
        let missing = Uuid::new_v4();
        let service = fixture.service();

        service.record_scan(fixture.by_code("A100"), at(10, 0)).await.unwrap();

        let summary = service
            .record_bulk(
                &fixture.session_id,
                AttendanceStatus::Absent,
                &[already.id, fresh.id, outsider.id, missing, fresh.id],
                at(13, 0),
            )
            .await
            .unwrap();

        assert_eq!(summary.recorded, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].student_id, missing);
        assert_eq!(fixture.store.record_count(), 3);
    }

    #[rocket::async_test]
    async fn bulk_on_completed_session_is_refused() {
        let fixture = Fixture::new();
        let student = fixture.student("A100", true);
        let service = fixture.service();
        service.complete_session(&fixture.session_id, at(12, 0)).await.unwrap();

        let result = service
            .record_bulk(&fixture.session_id, AttendanceStatus::Present, &[student.id], at(12, 5))
            .await;
        assert!(matches!(result, Err(AppError::Rejected(AttendanceRejection::SessionCompleted { .. }))));
    }

    #[rocket::async_test]
    async fn completing_session_marks_missing_students_absent() {
        let fixture = Fixture::new();
        let present = fixture.student("A100", true);
        let absent = fixture.student("A200", true);
        fixture.student("X300", false);
        let service = fixture.service();

        service.record_scan(fixture.by_code("A100"), at(10, 0)).await.unwrap();
        let marked = service.complete_session(&fixture.session_id, at(12, 0)).await.unwrap();

        assert_eq!(marked, 1);
        let absent_record = fixture.store.find_attendance(&absent.id, &fixture.session_id).await.unwrap().unwrap();
        assert_eq!(absent_record.status, AttendanceStatus::Absent);
        let present_record = fixture.store.find_attendance(&present.id, &fixture.session_id).await.unwrap().unwrap();
        assert_eq!(present_record.status, AttendanceStatus::Present);
        assert!(fixture.store.session(&fixture.session_id).completed);

        let again = service.complete_session(&fixture.session_id, at(12, 5)).await;
        assert!(matches!(again, Err(AppError::Rejected(AttendanceRejection::SessionCompleted { .. }))));
    }

    #[rocket::async_test]
    async fn justification_only_applies_to_absences() {
        let fixture = Fixture::new();
        let absent = fixture.student("A100", true);
        fixture.student("A200", true);
        let service = fixture.service();

        let present = service.record_scan(fixture.by_code("A200"), at(10, 0)).await.unwrap();
        let refused = service.justify(&present.id, "Doctor visit", None).await;
        assert!(matches!(
            refused,
            Err(AppError::Rejected(AttendanceRejection::InvalidTransition { .. }))
        ));

        let record = service
            .record_manual(&fixture.session_id, &absent.id, AttendanceStatus::Absent, ScanMetadata::default(), at(12, 0))
            .await
            .unwrap();
        let excused = service.justify(&record.id, "Doctor visit", Some("cert.pdf")).await.unwrap();
        assert_eq!(excused.status, AttendanceStatus::Excused);
        assert!(excused.justified);
        assert_eq!(excused.justification_document.as_deref(), Some("cert.pdf"));
    }

    #[rocket::async_test]
    async fn justification_does_not_overwrite_a_concurrent_correction() {
        let fixture = Fixture::new();
        let student = fixture.student("A100", true);
        let absent = fixture
            .service()
            .record_manual(&fixture.session_id, &student.id, AttendanceStatus::Absent, ScanMetadata::default(), at(12, 0))
            .await
            .unwrap();

        // An administrator corrects the record after the justification read it.
        let mut corrected = absent.clone();
        corrected.status = AttendanceStatus::Present;
        fixture.store.save_attendance(&corrected).await.unwrap();

        let store = LaggingStore::new(fixture.store);
        *store.snapshot.lock().unwrap() = Some(absent.clone());
        let service = AttendanceService::new(&store, &fixture.config);

        let refused = service.justify(&absent.id, "Doctor visit", None).await;
        assert_eq!(
            rejection(refused),
            AttendanceRejection::InvalidTransition {
                from: AttendanceStatus::Present,
                to: AttendanceStatus::Excused,
            }
        );

        let stored = store.inner.get_attendance_by_id(&absent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AttendanceStatus::Present);
        assert!(!stored.justified);
    }

    #[rocket::async_test]
    async fn generic_update_allows_any_transition() {
        let fixture = Fixture::new();
        fixture.student("A100", true);
        let service = fixture.service();
        let record = service.record_scan(fixture.by_code("A100"), at(10, 0)).await.unwrap();

        let updated = service
            .update_attendance(
                &record.id,
                AttendanceUpdateRequest {
                    status: AttendanceStatus::Excused,
                    justified: true,
                    justification_note: Some("  left early with permission ".to_string()),
                    justification_document: Some(String::new()),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, AttendanceStatus::Excused);
        assert_eq!(updated.justification_note.as_deref(), Some("left early with permission"));
        assert_eq!(updated.justification_document, None);
    }

    #[rocket::async_test]
    async fn deleting_unknown_record_is_not_found() {
        let fixture = Fixture::new();
        fixture.student("A100", true);
        let service = fixture.service();
        let record = service.record_scan(fixture.by_code("A100"), at(10, 0)).await.unwrap();

        service.delete_attendance(&record.id).await.unwrap();
        assert!(matches!(service.delete_attendance(&record.id).await, Err(AppError::NotFound(_))));
        assert_eq!(fixture.store.record_count(), 0);
    }

    #[rocket::async_test]
    async fn summary_counts_statuses_and_unrecorded_students() {
        let fixture = Fixture::new();
        fixture.student("A100", true);
        fixture.student("A200", true);
        let catching_up = fixture.student("A300", true);
        fixture.student("A400", true);
        let service = fixture.service();

        service.record_scan(fixture.by_code("A100"), at(10, 0)).await.unwrap();
        service.record_scan(fixture.by_code("A200"), at(10, 30)).await.unwrap();
        service
            .record_manual(&fixture.session_id, &catching_up.id, AttendanceStatus::CatchingUp, ScanMetadata::default(), at(11, 0))
            .await
            .unwrap();

        let summary = service.session_summary(&fixture.session_id).await.unwrap();
        assert_eq!(summary.enrolled, 4);
        assert_eq!(summary.present, 1);
        assert_eq!(summary.late, 1);
        assert_eq!(summary.catching_up, 1);
        assert_eq!(summary.unrecorded, 1);
        assert_eq!(service.list_for_session(&fixture.session_id).await.unwrap().len(), 3);
    }
}
