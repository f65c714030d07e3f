//! Configuration for the warelay services.
//!
//! Everything is environment-driven; unset variables fall back to defaults
//! that work for a local single-tenant deployment.
//!
//! # Environment Variable Mapping
//!
//! - `PORT` → listening port (default 3000)
//! - `BIND_ADDRESS` → listening address (default 0.0.0.0)
//! - `BROWSER_PATH` → browser executable override (default: best-effort discovery)
//! - `FFMPEG_CRF` → transcode quality, lower is better (default 28)
//! - `FFMPEG_PRESET` → transcode speed/size trade-off (default veryfast)
//! - `MAX_MEDIA_MB` → outbound media size cap in MiB (default 16)
//! - `AUTH_DIR` → root of the per-user authentication stores
//! - `TEMP_DIR` → root of the per-send scratch directories
//! - `LOG_LEVEL` / `LOG_FORMAT` → logging setup

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listening port.
    pub port: u16,
    /// Listening address.
    pub bind: String,
    /// Browser executable override. `None` means discovery, and ultimately
    /// letting the automation layer pick its own binary.
    pub browser_path: Option<PathBuf>,
    /// ffmpeg constant rate factor (quality), usable range 23..=30.
    pub ffmpeg_crf: u32,
    /// ffmpeg encoding preset (speed/size trade-off).
    pub ffmpeg_preset: String,
    /// Maximum outbound media size in MiB before transcoding kicks in.
    pub max_media_mb: u32,
    /// Root directory for per-user authentication stores.
    pub auth_dir: PathBuf,
    /// Root directory for per-send scratch areas.
    pub temp_dir: PathBuf,
    /// Base log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log output format: "pretty" or "json".
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind: "0.0.0.0".into(),
            browser_path: None,
            ffmpeg_crf: 28,
            ffmpeg_preset: "veryfast".into(),
            max_media_mb: 16,
            auth_dir: PathBuf::from(".warelay_auth"),
            temp_dir: PathBuf::from("temp_media"),
            log_level: "info".into(),
            log_format: "pretty".into(),
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PORT", defaults.port),
            bind: env_string("BIND_ADDRESS").unwrap_or(defaults.bind),
            browser_path: env_string("BROWSER_PATH").map(PathBuf::from),
            ffmpeg_crf: env_parse("FFMPEG_CRF", defaults.ffmpeg_crf),
            ffmpeg_preset: env_string("FFMPEG_PRESET").unwrap_or(defaults.ffmpeg_preset),
            max_media_mb: env_parse("MAX_MEDIA_MB", defaults.max_media_mb),
            auth_dir: env_string("AUTH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.auth_dir),
            temp_dir: env_string("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            log_level: env_string("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: env_string("LOG_FORMAT").unwrap_or(defaults.log_format),
        }
    }

    /// Authentication-store directory for one user. Doubles as the browser
    /// profile directory, so a restart resumes without a fresh handshake.
    pub fn auth_dir_for(&self, user_id: &str) -> PathBuf {
        self.auth_dir.join(user_id)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr + Copy>(name: &str, default: T) -> T {
    match env_string(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "unparseable value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_media_mb, 16);
        assert_eq!(config.ffmpeg_crf, 28);
        assert_eq!(config.ffmpeg_preset, "veryfast");
        assert!(config.browser_path.is_none());
    }

    #[test]
    fn test_auth_dir_for() {
        let config = Config::default();
        assert_eq!(
            config.auth_dir_for("u1"),
            PathBuf::from(".warelay_auth").join("u1")
        );
    }

    #[test]
    fn test_env_overrides() {
        // All env interaction lives in one test to avoid races between
        // parallel test threads.
        std::env::set_var("PORT", "8099");
        std::env::set_var("FFMPEG_CRF", "25");
        std::env::set_var("MAX_MEDIA_MB", "not-a-number");
        std::env::set_var("FFMPEG_PRESET", "  slow  ");
        std::env::set_var("BROWSER_PATH", "");

        let config = Config::from_env();
        assert_eq!(config.port, 8099);
        assert_eq!(config.ffmpeg_crf, 25);
        // Unparseable values fall back to the default.
        assert_eq!(config.max_media_mb, 16);
        // Values are trimmed, empty values count as unset.
        assert_eq!(config.ffmpeg_preset, "slow");
        assert!(config.browser_path.is_none());

        std::env::remove_var("PORT");
        std::env::remove_var("FFMPEG_CRF");
        std::env::remove_var("MAX_MEDIA_MB");
        std::env::remove_var("FFMPEG_PRESET");
        std::env::remove_var("BROWSER_PATH");
    }
}
