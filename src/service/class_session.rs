use crate::config::AttendanceConfig;
use crate::database::class_session::ClassSessionRepository;
use crate::error::app_error::AppError;
use crate::models::class_session::{AttendanceWindowResponse, ClassSession, SessionQrResponse};
use crate::service::attendance_window::AttendanceWindow;
use crate::service::qr_code::{QrCodeIssuer, QrRenderer, is_qr_valid};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Manages the rotating QR code a session displays for student self-scan.
///
/// Every operation loads the session, mutates it through [`QrCodeIssuer`] and
/// persists the QR fields back. Concurrent updates resolve last-writer-wins.
pub struct SessionQrService<'a, S: ClassSessionRepository + ?Sized> {
    store: &'a S,
    config: &'a AttendanceConfig,
    renderer: Arc<dyn QrRenderer>,
}

impl<'a, S: ClassSessionRepository + ?Sized> SessionQrService<'a, S> {
    pub fn new(store: &'a S, config: &'a AttendanceConfig, renderer: Arc<dyn QrRenderer>) -> Self {
        Self { store, config, renderer }
    }

    pub async fn issue(&self, session_id: &Uuid, now: DateTime<Utc>) -> Result<SessionQrResponse, AppError> {
        let session = self.load(session_id).await?;
        let session = self.render_off_worker(session, move |issuer, session| issuer.issue(session, now).map(drop)).await?;
        self.store.update_session_qr(&session).await?;
        info!(session_id = %session.id, expires_at = ?session.qr_expires_at, "session QR issued");
        Ok(qr_response(&session, now))
    }

    pub async fn regenerate(&self, session_id: &Uuid, now: DateTime<Utc>) -> Result<SessionQrResponse, AppError> {
        let session = self.load(session_id).await?;
        let session = self
            .render_off_worker(session, move |issuer, session| issuer.regenerate(session, now).map(drop))
            .await?;
        self.store.update_session_qr(&session).await?;
        info!(session_id = %session.id, "session QR regenerated");
        Ok(qr_response(&session, now))
    }

    pub async fn activate(&self, session_id: &Uuid, validity_minutes: Option<i64>, now: DateTime<Utc>) -> Result<SessionQrResponse, AppError> {
        let validity_minutes = validity_minutes.unwrap_or(self.config.default_qr_validity_minutes);
        if validity_minutes <= 0 {
            return Err(AppError::BadRequest("validity_minutes must be positive".to_string()));
        }

        let session = self.load(session_id).await?;
        let session = self
            .render_off_worker(session, move |issuer, session| issuer.activate(session, validity_minutes, now))
            .await?;
        self.store.update_session_qr(&session).await?;
        info!(session_id = %session.id, validity_minutes, "student self-scan activated");
        Ok(qr_response(&session, now))
    }

    pub async fn deactivate(&self, session_id: &Uuid, now: DateTime<Utc>) -> Result<SessionQrResponse, AppError> {
        let mut session = self.load(session_id).await?;
        QrCodeIssuer::new(self.config, self.renderer.as_ref()).deactivate(&mut session, now);
        self.store.update_session_qr(&session).await?;
        info!(session_id = %session.id, "student self-scan deactivated");
        Ok(qr_response(&session, now))
    }

    pub async fn status(&self, session_id: &Uuid, now: DateTime<Utc>) -> Result<SessionQrResponse, AppError> {
        let session = self.load(session_id).await?;
        Ok(qr_response(&session, now))
    }

    pub async fn window(&self, session_id: &Uuid, now: DateTime<Utc>) -> Result<AttendanceWindowResponse, AppError> {
        let session = self.load(session_id).await?;
        let window = AttendanceWindow::for_session(&session, self.config);
        Ok(AttendanceWindowResponse {
            session_id: session.id,
            allowed_start: window.allowed_start,
            allowed_end: window.allowed_end,
            late_threshold: window.late_threshold,
            open: !session.completed && window.is_within(now),
        })
    }

    async fn load(&self, session_id: &Uuid) -> Result<ClassSession, AppError> {
        self.store.get_session_by_id(session_id).await?.ok_or_else(AppError::session_not_found)
    }

    /// Runs an issuer mutation on the blocking pool; rendering a QR image is
    /// CPU-bound and must not stall the async workers.
    async fn render_off_worker<F>(&self, mut session: ClassSession, apply: F) -> Result<ClassSession, AppError>
    where
        F: FnOnce(&QrCodeIssuer<'_>, &mut ClassSession) -> Result<(), AppError> + Send + 'static,
    {
        let config = self.config.clone();
        let renderer = Arc::clone(&self.renderer);
        tokio::task::spawn_blocking(move || {
            apply(&QrCodeIssuer::new(&config, renderer.as_ref()), &mut session)?;
            Ok(session)
        })
        .await
        .map_err(|e| AppError::QrRender {
            message: format!("Task join error: {}", e),
        })?
    }
}

fn qr_response(session: &ClassSession, now: DateTime<Utc>) -> SessionQrResponse {
    SessionQrResponse {
        session_id: session.id,
        token: session.qr_token.clone(),
        expires_at: session.qr_expires_at,
        valid: is_qr_valid(session, now),
        attendance_mode: session.attendance_mode,
        qr_code: session.qr_image.clone(),
    }
}
