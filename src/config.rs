//! Server configuration from `SPLITPAGE_*` environment variables
//!
//! Unset or unparsable variables fall back to their defaults.

use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::visitor::CookiePolicy;

/// Runtime settings for the HTTP service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    /// Listen address (`SPLITPAGE_BIND`)
    pub bind_addr: String,
    /// SQLite file; in-memory store when unset (`SPLITPAGE_DATABASE`)
    pub database_path: Option<PathBuf>,
    /// Visitor cookie name (`SPLITPAGE_COOKIE_NAME`)
    pub cookie_name: String,
    /// Visitor cookie lifetime in seconds (`SPLITPAGE_COOKIE_MAX_AGE_SECS`)
    pub cookie_max_age_secs: u64,
    /// Mark the visitor cookie `Secure` (`SPLITPAGE_COOKIE_SECURE`)
    pub cookie_secure: bool,
    /// Default reporting window in days (`SPLITPAGE_REPORT_DAYS`)
    pub report_days: u32,
    /// Fixed assignment seed for reproducible runs (`SPLITPAGE_RNG_SEED`)
    pub rng_seed: Option<u64>,
    /// Request body limit (`SPLITPAGE_MAX_BODY_BYTES`)
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            database_path: None,
            cookie_name: "visitor_id".to_string(),
            cookie_max_age_secs: 60 * 60 * 24 * 365,
            cookie_secure: false,
            report_days: 30,
            rng_seed: None,
            max_body_bytes: 16 * 1024,
        }
    }
}

impl ServerConfig {
    /// Read the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_string("SPLITPAGE_BIND").unwrap_or(defaults.bind_addr),
            database_path: env_string("SPLITPAGE_DATABASE").map(PathBuf::from),
            cookie_name: env_string("SPLITPAGE_COOKIE_NAME").unwrap_or(defaults.cookie_name),
            cookie_max_age_secs: env_u64(
                "SPLITPAGE_COOKIE_MAX_AGE_SECS",
                defaults.cookie_max_age_secs,
            ),
            cookie_secure: env_bool("SPLITPAGE_COOKIE_SECURE", defaults.cookie_secure),
            report_days: env_u32("SPLITPAGE_REPORT_DAYS", defaults.report_days),
            rng_seed: env_string("SPLITPAGE_RNG_SEED").and_then(|v| v.parse().ok()),
            max_body_bytes: env_usize("SPLITPAGE_MAX_BODY_BYTES", defaults.max_body_bytes),
        }
    }

    /// The visitor cookie settings.
    #[must_use]
    pub fn cookie_policy(&self) -> CookiePolicy {
        CookiePolicy {
            name: self.cookie_name.clone(),
            max_age: Duration::from_secs(self.cookie_max_age_secs),
            secure: self.cookie_secure,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}
