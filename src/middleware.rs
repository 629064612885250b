use crate::models::attendance::ScanMetadata;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::{Data, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use std::net::IpAddr;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-request correlation id and start time, cached on the request by
/// [`RequestTracing`].
#[derive(Debug, Clone)]
pub struct RequestTrace {
    pub id: String,
    pub started: Instant,
}

impl RequestTrace {
    fn start() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started: Instant::now(),
        }
    }
}

/// Correlation id of the request, or "unknown" when the fairing is not attached.
pub fn request_id<'r>(request: &'r Request<'_>) -> &'r str {
    request
        .local_cache(|| None::<RequestTrace>)
        .as_ref()
        .map(|trace| trace.id.as_str())
        .unwrap_or("unknown")
}

/// Tags every request with an id, echoes it as `X-Request-Id` and logs the
/// outcome with its latency.
pub struct RequestTracing;

#[rocket::async_trait]
impl Fairing for RequestTracing {
    fn info(&self) -> Info {
        Info {
            name: "Request Tracing",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        let trace = request.local_cache(|| Some(RequestTrace::start()));
        if let Some(trace) = trace {
            info!(request_id = %trace.id, method = %request.method(), uri = %request.uri(), "incoming request");
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let trace = request.local_cache(|| None::<RequestTrace>).as_ref();
        let request_id = trace.map(|t| t.id.clone()).unwrap_or_else(|| "unknown".to_string());
        let elapsed_ms = trace.map_or(0, |t| u64::try_from(t.started.elapsed().as_millis()).unwrap_or(u64::MAX));
        let status = response.status();

        response.set_header(Header::new("X-Request-Id", request_id.clone()));
        response.set_header(Header::new("X-Content-Type-Options", "nosniff"));
        response.set_header(Header::new("X-Frame-Options", "DENY"));
        response.set_header(Header::new("Cache-Control", "no-store"));

        if status.class().is_server_error() || status.class().is_client_error() {
            warn!(
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
                status = status.code,
                elapsed_ms,
                "request completed with error"
            );
        } else {
            info!(
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
                status = status.code,
                elapsed_ms,
                "request completed"
            );
        }
    }
}

/// Where a scan came from: the caller's `User-Agent` and client address.
/// Never fails; both parts are optional on the stored record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOrigin {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl ScanOrigin {
    pub fn from_parts(user_agent: Option<&str>, ip: Option<IpAddr>) -> Self {
        Self {
            user_agent: user_agent.map(str::trim).filter(|ua| !ua.is_empty()).map(str::to_string),
            ip_address: ip.map(|ip| ip.to_string()),
        }
    }

    /// Device data sent in the body wins over the `User-Agent` header.
    pub fn scan_metadata(self, device_info: Option<String>, latitude: Option<f64>, longitude: Option<f64>) -> ScanMetadata {
        ScanMetadata {
            device_info: device_info
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .or(self.user_agent),
            ip_address: self.ip_address,
            latitude,
            longitude,
        }
    }

    /// Metadata for entries recorded without a scan: no position.
    pub fn manual_metadata(self) -> ScanMetadata {
        self.scan_metadata(None, None, None)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ScanOrigin {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, ()> {
        Outcome::Success(ScanOrigin::from_parts(request.headers().get_one("User-Agent"), request.client_ip()))
    }
}

impl<'a> OpenApiFromRequest<'a> for ScanOrigin {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}
