use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, warn};

const DEFAULT_GEOCODER_ENDPOINT: &str = "https://api.opencagedata.com/geocode/v1/json";
const DEFAULT_SUNTIMES_ENDPOINT: &str = "https://api.sunrisesunset.io/json";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_TELEMETRY_BUFFER_MAX_BYTES: u64 = 5 * 1024 * 1024;

/// What the resolver does with a provider row whose sunrise/sunset/golden
/// hour fields came back blank. `Abort` fails the whole request before the
/// row is persisted; `Skip` drops the row and keeps filling the rest of
/// the range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IncompleteRowPolicy {
    Abort,
    Skip,
}

impl IncompleteRowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncompleteRowPolicy::Abort => "abort",
            IncompleteRowPolicy::Skip => "skip",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Some(IncompleteRowPolicy::Abort),
            "skip" => Some(IncompleteRowPolicy::Skip),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub geocoder_endpoint: String,
    pub geocoder_api_key: Option<SecretString>,
    pub suntimes_endpoint: String,
    pub http_timeout_secs: u64,
    pub database_file_name: String,
    pub incomplete_row_policy: IncompleteRowPolicy,
    pub telemetry_enabled_by_default: bool,
    pub telemetry_batch_size: usize,
    pub telemetry_buffer_max_bytes: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub geocoder_endpoint: String,
    pub has_geocoder_key: bool,
    pub suntimes_endpoint: String,
    pub http_timeout_secs: u64,
    pub database_file_name: String,
    pub incomplete_row_policy: IncompleteRowPolicy,
    pub telemetry_enabled_by_default: bool,
    pub telemetry_batch_size: usize,
    pub telemetry_buffer_max_bytes: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            geocoder_endpoint: env::var("GEOCODER_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_GEOCODER_ENDPOINT.to_string()),
            geocoder_api_key: env::var("GEOCODER_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| SecretString::new(v.into())),
            suntimes_endpoint: env::var("SUNTIMES_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_SUNTIMES_ENDPOINT.to_string()),
            http_timeout_secs: parse_u64("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS).max(1),
            database_file_name: env::var("DATABASE_FILE_NAME")
                .unwrap_or_else(|_| "suncache.db".to_string()),
            incomplete_row_policy: parse_policy("INCOMPLETE_ROW_POLICY"),
            telemetry_enabled_by_default: parse_bool("TELEMETRY_ENABLED", true),
            telemetry_batch_size: parse_usize("TELEMETRY_BATCH_SIZE", 25),
            telemetry_buffer_max_bytes: parse_u64(
                "TELEMETRY_BUFFER_MAX_BYTES",
                DEFAULT_TELEMETRY_BUFFER_MAX_BYTES,
            ),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            geocoder_endpoint: self.geocoder_endpoint.clone(),
            has_geocoder_key: self.geocoder_api_key.is_some(),
            suntimes_endpoint: self.suntimes_endpoint.clone(),
            http_timeout_secs: self.http_timeout_secs,
            database_file_name: self.database_file_name.clone(),
            incomplete_row_policy: self.incomplete_row_policy,
            telemetry_enabled_by_default: self.telemetry_enabled_by_default,
            telemetry_batch_size: self.telemetry_batch_size,
            telemetry_buffer_max_bytes: self.telemetry_buffer_max_bytes,
        }
    }
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

fn parse_policy(key: &str) -> IncompleteRowPolicy {
    match env::var(key) {
        Ok(value) => IncompleteRowPolicy::parse(&value).unwrap_or_else(|| {
            warn!(key, value = %value, "unrecognized incomplete-row policy; using abort");
            IncompleteRowPolicy::Abort
        }),
        Err(_) => IncompleteRowPolicy::Abort,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("GEOCODER_API_KEY", "secret");
        env::set_var("DATABASE_FILE_NAME", "custom.db");
        env::set_var("TELEMETRY_ENABLED", "false");
        env::set_var("INCOMPLETE_ROW_POLICY", "skip");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.database_file_name, "custom.db");
        assert!(!public.telemetry_enabled_by_default);
        assert!(public.has_geocoder_key);
        assert!(config.geocoder_api_key.is_some());
        assert_eq!(public.incomplete_row_policy, IncompleteRowPolicy::Skip);
        assert_eq!(public.geocoder_endpoint, DEFAULT_GEOCODER_ENDPOINT);
        assert_eq!(public.suntimes_endpoint, DEFAULT_SUNTIMES_ENDPOINT);

        env::remove_var("GEOCODER_API_KEY");
        env::remove_var("DATABASE_FILE_NAME");
        env::remove_var("TELEMETRY_ENABLED");
        env::remove_var("INCOMPLETE_ROW_POLICY");
    }

    #[test]
    fn parses_policy_labels() {
        assert_eq!(IncompleteRowPolicy::parse("ABORT"), Some(IncompleteRowPolicy::Abort));
        assert_eq!(IncompleteRowPolicy::parse(" skip "), Some(IncompleteRowPolicy::Skip));
        assert_eq!(IncompleteRowPolicy::parse("halt"), None);
    }
}
