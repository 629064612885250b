use rocket::figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_PATH: &str = "/api/v1";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub cors: CorsConfig,
    pub attendance: AttendanceConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,
    pub acquire_timeout: u64,
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    pub base_path: String,
    pub enable_swagger: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Timing and proximity rules handed to the attendance engine.
///
/// The late cutoff is not part of this structure: a scan is late once it
/// arrives more than fifteen minutes after the scheduled start, whatever the
/// configured allowances.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AttendanceConfig {
    /// Minutes before the scheduled start during which scans are accepted.
    pub early_allowance_minutes: i64,
    /// Minutes after the scheduled end during which scans are still accepted.
    pub grace_period_minutes: i64,
    pub max_distance_km: f64,
    pub campus_latitude: f64,
    pub campus_longitude: f64,
    /// Used by QR activation when the caller gives no explicit validity.
    pub default_qr_validity_minutes: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/attendance_db".to_string(),
            max_connections: 16,
            min_connections: 4,
            connection_timeout: 5,
            acquire_timeout: 5,
            run_migrations: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            address: "127.0.0.1".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_API_BASE_PATH.to_string(),
            enable_swagger: true,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:5173".to_string()],
            allow_credentials: true,
        }
    }
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            early_allowance_minutes: 15,
            grace_period_minutes: 30,
            max_distance_km: 0.5,
            campus_latitude: 30.4278,
            campus_longitude: -9.5981,
            default_qr_validity_minutes: 30,
        }
    }
}

/// Upper bound for every minute-valued rule: one day.
pub const MAX_RULE_MINUTES: i64 = 24 * 60;

impl AttendanceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0..=MAX_RULE_MINUTES).contains(&self.early_allowance_minutes) {
            return Err(format!("attendance.early_allowance_minutes must be within [0, {}]", MAX_RULE_MINUTES));
        }
        if !(0..=MAX_RULE_MINUTES).contains(&self.grace_period_minutes) {
            return Err(format!("attendance.grace_period_minutes must be within [0, {}]", MAX_RULE_MINUTES));
        }
        if !(1..=MAX_RULE_MINUTES).contains(&self.default_qr_validity_minutes) {
            return Err(format!("attendance.default_qr_validity_minutes must be within [1, {}]", MAX_RULE_MINUTES));
        }
        if self.max_distance_km.is_nan() || self.max_distance_km <= 0.0 {
            return Err("attendance.max_distance_km must be positive".to_string());
        }
        if !(-90.0..=90.0).contains(&self.campus_latitude) {
            return Err("attendance.campus_latitude must be within [-90, 90]".to_string());
        }
        if !(-180.0..=180.0).contains(&self.campus_longitude) {
            return Err("attendance.campus_longitude must be within [-180, 180]".to_string());
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from multiple sources in priority order:
    /// 1. Built-in defaults
    /// 2. Attendance.toml (if present)
    /// 3. Environment variables (prefixed with ATTENDANCE_, e.g. ATTENDANCE_ATTENDANCE__GRACE_PERIOD_MINUTES)
    /// 4. DATABASE_URL environment variable
    pub fn load() -> Result<Self, figment::Error> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("Attendance.toml"))
            .merge(Env::prefixed("ATTENDANCE_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()));

        let config: Config = figment.extract()?;
        config.attendance.validate().map_err(figment::Error::from)?;
        Ok(config)
    }
}
