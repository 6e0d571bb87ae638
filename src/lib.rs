//! Browser Warden
//!
//! A watchdog for one persistent Chromium automation session: launches the
//! browser, probes its control channel on a fixed interval, and tears it
//! down and relaunches it when the session becomes unrecoverable.

pub mod browser;
pub mod supervisor;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use browser::SessionConfig;
use supervisor::RestartPolicy;

/// Application configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Pause between liveness probes, in milliseconds
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Bound on a single probe round-trip, in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Max tolerated time since the last successful probe, in milliseconds
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
    /// Pause between teardown and relaunch, in milliseconds
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// How long a fresh browser gets to prove responsive, in milliseconds
    #[serde(default = "default_stabilization_ms")]
    pub stabilization_ms: u64,

    /// Run the browser headless (default is a visible window)
    #[serde(default)]
    pub headless: bool,
    /// Browser profile directory (defaults to the app data dir)
    #[serde(default)]
    pub profile_dir: Option<String>,
    /// Chrome/Chromium executable (auto-detected when unset)
    #[serde(default)]
    pub chrome_path: Option<String>,
    /// Page opened after each launch, best effort (empty disables)
    #[serde(default = "default_start_url")]
    pub start_url: String,

    /// Window width
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    /// Window height
    #[serde(default = "default_window_height")]
    pub window_height: u32,
}

fn default_probe_interval_ms() -> u64 {
    30_000
}
fn default_probe_timeout_ms() -> u64 {
    30_000
}
fn default_stale_threshold_ms() -> u64 {
    30_000
}
fn default_cooldown_ms() -> u64 {
    2_000
}
fn default_stabilization_ms() -> u64 {
    2_000
}
fn default_start_url() -> String {
    "http://localhost".to_string()
}
fn default_window_width() -> u32 {
    1920
}
fn default_window_height() -> u32 {
    1080
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            stale_threshold_ms: default_stale_threshold_ms(),
            cooldown_ms: default_cooldown_ms(),
            stabilization_ms: default_stabilization_ms(),
            headless: false,
            profile_dir: None,
            chrome_path: None,
            start_url: default_start_url(),
            window_width: default_window_width(),
            window_height: default_window_height(),
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("browser-warden").join("logs"))
}

impl AppConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("browser-warden").join("config.json"))
    }

    /// Load the config file, writing defaults on first run so the file is
    /// there to edit.
    pub fn load_or_init() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            Some(path) => {
                let config = Self::default();
                config.save_to(&path);
                config
            }
            None => Self::default(),
        }
    }

    /// Load config from a file, falling back to defaults on any failure
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => {
                    info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}", e);
                }
            },
            Err(e) => {
                warn!("Failed to read config file: {}", e);
            }
        }
        Self::default()
    }

    /// Save config to the default location
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            self.save_to(&path);
        }
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!("Failed to create config directory: {}", e);
                return;
            }
        }

        match serde_json::to_string_pretty(self) {
            Ok(content) => {
                if let Err(e) = std::fs::write(path, content) {
                    error!("Failed to save config: {}", e);
                } else {
                    info!("Config saved to {:?}", path);
                }
            }
            Err(e) => {
                error!("Failed to serialize config: {}", e);
            }
        }
    }

    /// Apply `WARDEN_*` environment overrides on top of the file config.
    pub fn with_env_overrides(mut self) -> Self {
        fn env_u64(name: &str) -> Option<u64> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }

        if let Some(v) = env_u64("WARDEN_PROBE_INTERVAL_MS") {
            self.probe_interval_ms = v;
        }
        if let Some(v) = env_u64("WARDEN_PROBE_TIMEOUT_MS") {
            self.probe_timeout_ms = v;
        }
        if let Some(v) = env_u64("WARDEN_STALE_THRESHOLD_MS") {
            self.stale_threshold_ms = v;
        }
        if let Some(v) = env_u64("WARDEN_COOLDOWN_MS") {
            self.cooldown_ms = v;
        }
        if let Some(v) = env_u64("WARDEN_STABILIZATION_MS") {
            self.stabilization_ms = v;
        }
        if let Ok(v) = std::env::var("WARDEN_HEADLESS") {
            self.headless = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("WARDEN_START_URL") {
            self.start_url = v;
        }
        if let Ok(v) = std::env::var("WARDEN_PROFILE_DIR") {
            if !v.is_empty() {
                self.profile_dir = Some(v);
            }
        }
        if let Ok(v) = std::env::var("WARDEN_CHROME") {
            if !v.is_empty() {
                self.chrome_path = Some(v);
            }
        }
        self
    }

    /// Timing knobs for the supervisor.
    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            probe_interval: Duration::from_millis(self.probe_interval_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            stale_threshold: Duration::from_millis(self.stale_threshold_ms),
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }

    /// Browser-facing subset of the config.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            chrome_path: self.chrome_path.clone(),
            headless: self.headless,
            profile_dir: self
                .profile_dir
                .clone()
                .map(PathBuf::from)
                .unwrap_or_else(default_profile_dir),
            window_width: self.window_width,
            window_height: self.window_height,
            stabilization: Duration::from_millis(self.stabilization_ms),
            start_url: if self.start_url.is_empty() {
                None
            } else {
                Some(self.start_url.clone())
            },
        }
    }
}

fn default_profile_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("browser-warden")
        .join("profile")
}

/// Initialize logging: console plus a daily-rolling file in the log dir.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "browser-warden.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
