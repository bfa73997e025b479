use std::collections::{HashMap, HashSet};
use std::env;

use anyhow::{anyhow, bail, Result};

use crate::auth::StaticTokenAuthenticator;
use crate::history::ConvexConfig;
use crate::provider::openai::{OpenAiConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::telemetry::RotationConfig;
use crate::validation::{UploadLimits, PDF_MIME_TYPE};

/// Fixed allowance for JSON framing, field names and file names on top of
/// the base64-inflated upload size.
const REQUEST_OVERHEAD_BYTES: usize = 64 * 1024;
const DEFAULT_AUTH_TIMEOUT_MS: u64 = 3000;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: OpenAiConfig,
    pub auth_tokens: Option<HashMap<String, String>>,
    pub auth_verify_url: Option<String>,
    pub auth_timeout_ms: u64,
    pub history_store: Option<ConvexConfig>,
    pub limits: UploadLimits,
    pub max_request_bytes: usize,
    pub log_file: Option<String>,
    pub rotation: RotationConfig,
    pub log_stdout: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = non_empty_var("AI_GATEWAY_API_KEY").or_else(|| non_empty_var("OPENAI_API_KEY"));
        let provider = OpenAiConfig {
            base_url: non_empty_var("AI_GATEWAY_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: non_empty_var("ANALYSIS_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout_ms: parse_optional_u64("PROVIDER_TIMEOUT_MS")?,
        };

        let auth_tokens = non_empty_var("AUTH_TOKENS")
            .map(|raw| StaticTokenAuthenticator::parse_pairs(&raw))
            .filter(|map| !map.is_empty());
        let auth_verify_url = non_empty_var("AUTH_VERIFY_URL");
        let auth_timeout_ms = parse_optional_u64("AUTH_TIMEOUT_MS")?.unwrap_or(DEFAULT_AUTH_TIMEOUT_MS);

        let history_store = match (non_empty_var("HISTORY_STORE_URL"), non_empty_var("HISTORY_STORE_ADMIN_KEY")) {
            (Some(url), Some(admin_key)) => Some(ConvexConfig {
                url,
                admin_key,
                timeout_ms: parse_optional_u64("HISTORY_STORE_TIMEOUT_MS")?
                    .unwrap_or(DEFAULT_STORE_TIMEOUT_MS),
            }),
            (None, None) => None,
            (Some(_), None) => bail!("HISTORY_STORE_URL is set but HISTORY_STORE_ADMIN_KEY is missing"),
            (None, Some(_)) => bail!("HISTORY_STORE_ADMIN_KEY is set but HISTORY_STORE_URL is missing"),
        };

        let defaults = UploadLimits::default();
        let allowed_mime_types = non_empty_var("ALLOWED_MIME_TYPES")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect::<HashSet<_>>()
            })
            .filter(|set| !set.is_empty())
            .unwrap_or_else(|| HashSet::from([PDF_MIME_TYPE.to_string()]));
        let limits = UploadLimits {
            max_files: parse_positive("MAX_FILES")?.unwrap_or(defaults.max_files),
            max_file_bytes: parse_positive("MAX_FILE_BYTES")?.unwrap_or(defaults.max_file_bytes),
            max_total_bytes: parse_positive("MAX_TOTAL_BYTES")?.unwrap_or(defaults.max_total_bytes),
            allowed_mime_types,
        };
        let max_request_bytes = parse_positive("MAX_REQUEST_BYTES")?
            .unwrap_or_else(|| default_request_limit(&limits));

        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        Ok(Self {
            provider,
            auth_tokens,
            auth_verify_url,
            auth_timeout_ms,
            history_store,
            limits,
            max_request_bytes,
            log_file: non_empty_var("LOG_FILE"),
            rotation,
            log_stdout: parse_bool_env("AUDIT_LOG_STDOUT")?.unwrap_or(false),
        })
    }
}

/// Body cap large enough that every batch the upload gate has to judge
/// reaches it: one file over the count limit at the per-file limit, or the
/// whole total limit, whichever is larger, inflated by base64's 4/3.
pub fn default_request_limit(limits: &UploadLimits) -> usize {
    let over_count = limits
        .max_files
        .saturating_add(1)
        .saturating_mul(limits.max_file_bytes);
    over_count
        .max(limits.max_total_bytes)
        .div_ceil(3)
        .saturating_mul(4)
        .saturating_add(REQUEST_OVERHEAD_BYTES)
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_positive(var: &str) -> Result<Option<usize>> {
    match parse_optional_u64(var)? {
        Some(0) => Err(anyhow!("{} must be greater than zero", var)),
        Some(v) => Ok(Some(v as usize)),
        None => Ok(None),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "AI_GATEWAY_API_KEY",
        "OPENAI_API_KEY",
        "AI_GATEWAY_BASE_URL",
        "ANALYSIS_MODEL",
        "PROVIDER_TIMEOUT_MS",
        "AUTH_TOKENS",
        "AUTH_VERIFY_URL",
        "AUTH_TIMEOUT_MS",
        "HISTORY_STORE_URL",
        "HISTORY_STORE_ADMIN_KEY",
        "HISTORY_STORE_TIMEOUT_MS",
        "ALLOWED_MIME_TYPES",
        "MAX_FILES",
        "MAX_FILE_BYTES",
        "MAX_TOTAL_BYTES",
        "MAX_REQUEST_BYTES",
        "LOG_FILE",
        "LOG_MAX_BYTES",
        "LOG_ROTATE_KEEP",
        "LOG_ROTATE_COMPRESS",
        "AUDIT_LOG_STDOUT",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn parses_environment_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.provider.model, DEFAULT_MODEL);
        assert!(cfg.provider.api_key.is_none());
        assert!(cfg.provider.timeout_ms.is_none());
        assert!(cfg.auth_tokens.is_none());
        assert!(cfg.history_store.is_none());
        assert_eq!(cfg.limits.max_files, 5);
        assert_eq!(cfg.limits.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.limits.max_total_bytes, 25 * 1024 * 1024);
        assert!(cfg.limits.allowed_mime_types.contains("application/pdf"));
        assert_eq!(cfg.max_request_bytes, default_request_limit(&cfg.limits));
        assert!(cfg.log_file.is_none());
        assert_eq!(cfg.rotation.keep, 1);
        assert!(!cfg.log_stdout);
    }

    #[test]
    fn parses_full_configuration() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("OPENAI_API_KEY", "sk-fallback");
        std::env::set_var("AI_GATEWAY_API_KEY", "gw-key");
        std::env::set_var("AI_GATEWAY_BASE_URL", "http://localhost:9000/v1");
        std::env::set_var("ANALYSIS_MODEL", "openai/gpt-4o-mini");
        std::env::set_var("PROVIDER_TIMEOUT_MS", "60000");
        std::env::set_var("AUTH_TOKENS", "t1:alice,t2:bob");
        std::env::set_var("HISTORY_STORE_URL", "https://happy-otter.convex.cloud");
        std::env::set_var("HISTORY_STORE_ADMIN_KEY", "admin");
        std::env::set_var("ALLOWED_MIME_TYPES", "application/pdf, Image/PNG");
        std::env::set_var("MAX_FILES", "3");
        std::env::set_var("MAX_FILE_BYTES", "1024");
        std::env::set_var("MAX_TOTAL_BYTES", "2048");
        std::env::set_var("LOG_FILE", "/tmp/events.log");
        std::env::set_var("LOG_MAX_BYTES", "4096");
        std::env::set_var("LOG_ROTATE_KEEP", "3");
        std::env::set_var("LOG_ROTATE_COMPRESS", "yes");
        std::env::set_var("AUDIT_LOG_STDOUT", "1");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.provider.api_key.as_deref(), Some("gw-key"));
        assert_eq!(cfg.provider.base_url, "http://localhost:9000/v1");
        assert_eq!(cfg.provider.model, "openai/gpt-4o-mini");
        assert_eq!(cfg.provider.timeout_ms, Some(60000));
        let tokens = cfg.auth_tokens.unwrap();
        assert_eq!(tokens.get("t2").map(String::as_str), Some("bob"));
        let store = cfg.history_store.unwrap();
        assert_eq!(store.admin_key, "admin");
        assert_eq!(store.timeout_ms, DEFAULT_STORE_TIMEOUT_MS);
        assert!(cfg.limits.allowed_mime_types.contains("image/png"));
        assert_eq!(cfg.limits.max_files, 3);
        assert_eq!(cfg.limits.max_file_bytes, 1024);
        assert_eq!(cfg.limits.max_total_bytes, 2048);
        assert_eq!(cfg.max_request_bytes, default_request_limit(&cfg.limits));
        assert_eq!(cfg.log_file.as_deref(), Some("/tmp/events.log"));
        assert_eq!(cfg.rotation.max_bytes, Some(4096));
        assert_eq!(cfg.rotation.keep, 3);
        assert!(cfg.rotation.compress);
        assert!(cfg.log_stdout);

        clear_env();
    }

    #[test]
    fn rejects_half_configured_store_and_zero_limits() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("HISTORY_STORE_URL", "https://happy-otter.convex.cloud");
        let err = AppConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("HISTORY_STORE_ADMIN_KEY"));
        clear_env();

        std::env::set_var("MAX_FILES", "0");
        let err = AppConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("MAX_FILES"));
        clear_env();
    }

    #[test]
    fn default_body_cap_fits_batches_the_upload_gate_rejects() {
        let limits = UploadLimits::default();
        let cap = default_request_limit(&limits);
        // six files at the per-file limit, base64 encoded
        assert!(cap >= 6 * limits.max_file_bytes / 3 * 4);
        // 9 + 9 + 8 MiB crosses the total limit and must still reach it
        assert!(cap >= 26 * 1024 * 1024 / 3 * 4);

        let wide_total = UploadLimits {
            max_files: 1,
            max_file_bytes: 10,
            max_total_bytes: 3000,
            ..UploadLimits::default()
        };
        assert_eq!(default_request_limit(&wide_total), 4000 + REQUEST_OVERHEAD_BYTES);
    }
}
