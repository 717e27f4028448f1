use std::path::PathBuf;
use std::{env, io};

use directories::ProjectDirs;
use reqwest::Url;
use serde::Serialize;
use tracing::debug;

use crate::errors::{AppError, AppResult};

pub const DEFAULT_ENDPOINT_URL: &str = "http://localhost:5678/webhook/lead-generation";
pub const DEFAULT_WORKFLOW_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_PROFILE_MARKER: &str = "/in/";
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_500;
const MIN_PROBE_TIMEOUT_MS: u64 = 100;
const MAX_PROBE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_JOURNAL_BUFFER_MAX_BYTES: u64 = 1024 * 1024;
const DEFAULT_JOURNAL_BUFFER_MAX_FILES: usize = 3;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub endpoint_url: String,
    pub workflow_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub profile_marker: String,
    pub data_dir: PathBuf,
    pub journal_enabled: bool,
    pub journal_buffer_max_bytes: u64,
    pub journal_buffer_max_files: usize,
    pub export_file_stem: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub endpoint_base: Option<String>,
    pub workflow_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub profile_marker: String,
    pub data_dir: String,
    pub journal_enabled: bool,
    pub journal_buffer_max_bytes: u64,
    pub journal_buffer_max_files: usize,
    pub export_file_stem: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            endpoint_url: non_empty_var("WORKFLOW_ENDPOINT_URL")
                .unwrap_or_else(|| DEFAULT_ENDPOINT_URL.to_string()),
            workflow_timeout_ms: parse_u64("WORKFLOW_TIMEOUT_MS", DEFAULT_WORKFLOW_TIMEOUT_MS)
                .max(1),
            probe_timeout_ms: parse_u64("PROBE_TIMEOUT_MS", DEFAULT_PROBE_TIMEOUT_MS)
                .clamp(MIN_PROBE_TIMEOUT_MS, MAX_PROBE_TIMEOUT_MS),
            profile_marker: non_empty_var("PROFILE_PATH_MARKER")
                .unwrap_or_else(|| DEFAULT_PROFILE_MARKER.to_string()),
            data_dir: non_empty_var("LEAD_CONSOLE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            journal_enabled: parse_bool("JOURNAL_ENABLED", true),
            journal_buffer_max_bytes: parse_u64(
                "JOURNAL_BUFFER_MAX_BYTES",
                DEFAULT_JOURNAL_BUFFER_MAX_BYTES,
            ),
            journal_buffer_max_files: parse_usize(
                "JOURNAL_BUFFER_MAX_FILES",
                DEFAULT_JOURNAL_BUFFER_MAX_FILES,
            )
            .max(1),
            export_file_stem: non_empty_var("EXPORT_FILE_STEM")
                .unwrap_or_else(|| "leads".to_string()),
        }
    }

    /// Scheme, host and port of the action endpoint; the probe targets this
    /// rather than the webhook path.
    pub fn endpoint_base(&self) -> AppResult<String> {
        endpoint_base(&self.endpoint_url)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            endpoint_base: self.endpoint_base().ok(),
            workflow_timeout_ms: self.workflow_timeout_ms,
            probe_timeout_ms: self.probe_timeout_ms,
            profile_marker: self.profile_marker.clone(),
            data_dir: self.data_dir.to_string_lossy().to_string(),
            journal_enabled: self.journal_enabled,
            journal_buffer_max_bytes: self.journal_buffer_max_bytes,
            journal_buffer_max_files: self.journal_buffer_max_files,
            export_file_stem: self.export_file_stem.clone(),
        }
    }
}

pub fn endpoint_base(endpoint_url: &str) -> AppResult<String> {
    let url = Url::parse(endpoint_url.trim())
        .map_err(|err| AppError::InvalidEndpoint(format!("{endpoint_url}: {err}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| AppError::InvalidEndpoint(format!("{endpoint_url}: missing host")))?;
    let base = match url.port() {
        Some(port) => format!("{}://{host}:{port}/", url.scheme()),
        None => format!("{}://{host}/", url.scheme()),
    };
    Ok(base)
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", "lead-console")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".lead-console"))
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
