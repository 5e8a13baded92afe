use std::env;
use std::path::PathBuf;

use crate::automation::errors::{PushCastError, Result};

/// Which audience-generation path the engine prefers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineVersion {
    /// Legacy subprocess scripts only.
    V1,
    /// In-process generators first, subprocess fallback.
    V2,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Base URL of the push-send service the engine streams from.
    pub downstream_base_url: String,
    pub cadence_service_url: Option<String>,
    pub engine_version: EngineVersion,
    pub scripts_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Set while the host build pipeline statically analyzes the app;
    /// engine construction is suppressed when true.
    pub build_phase: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse()
            .map_err(|_| PushCastError::Config("Invalid PORT value".to_string()))?;

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:data/pushcast.db?mode=rwc".to_string());

        // Production exposes the service through its static hostname;
        // everywhere else the push-send endpoint is local.
        let downstream_base_url = match env::var("RAILWAY_STATIC_URL") {
            Ok(host) if !host.trim().is_empty() => format!("https://{}", host.trim()),
            _ => format!("http://localhost:{port}"),
        };

        let cadence_service_url = env::var("CADENCE_SERVICE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let engine_version = match env::var("AUTOMATION_ENGINE_VERSION").as_deref() {
            Ok("v1") => EngineVersion::V1,
            Ok("v2") | Err(_) => EngineVersion::V2,
            Ok(other) => {
                return Err(PushCastError::Config(format!(
                    "Invalid AUTOMATION_ENGINE_VERSION '{other}' (expected v1 or v2)"
                )));
            }
        };

        let scripts_dir = PathBuf::from(
            env::var("AUDIENCE_SCRIPTS_DIR").unwrap_or_else(|_| "scripts".to_string()),
        );
        let output_dir = PathBuf::from(
            env::var("AUDIENCE_OUTPUT_DIR").unwrap_or_else(|_| "data/audiences".to_string()),
        );

        let build_phase = env::var("BUILD_PHASE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        // Ensure data directory exists for sqlite backends
        if let Some(db_path_str) = database_url.strip_prefix("sqlite:") {
            if let Some(db_path) = db_path_str.split('?').next() {
                if let Some(parent) = std::path::Path::new(db_path).parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        PushCastError::Config(format!("Failed to create data directory: {e}"))
                    })?;
                }
            }
        }

        Ok(Config {
            port,
            database_url,
            downstream_base_url,
            cadence_service_url,
            engine_version,
            scripts_dir,
            output_dir,
            build_phase,
        })
    }
}
