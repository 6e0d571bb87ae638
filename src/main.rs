//! Browser Warden - session watchdog
//!
//! Launches a persistent Chromium session and keeps it alive: probes the
//! control channel on a fixed interval and relaunches the browser when the
//! session is judged unrecoverable. A failed relaunch is fatal.
//!
//! Environment variables (override the config file):
//! - `WARDEN_PROBE_INTERVAL_MS` - pause between liveness probes
//! - `WARDEN_PROBE_TIMEOUT_MS` - bound on a single probe round-trip
//! - `WARDEN_STALE_THRESHOLD_MS` - tolerated time without a successful probe
//! - `WARDEN_COOLDOWN_MS` - pause between teardown and relaunch
//! - `WARDEN_STABILIZATION_MS` - readiness window for a fresh browser
//! - `WARDEN_HEADLESS` - run without a visible window
//! - `WARDEN_START_URL` - page opened after each launch (empty disables)
//! - `WARDEN_PROFILE_DIR` - persistent browser profile directory
//! - `WARDEN_CHROME` - Chrome/Chromium executable path

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use browser_warden::browser::BrowserLauncher;
use browser_warden::supervisor::Supervisor;
use browser_warden::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = browser_warden::init_logging();

    info!("Starting Browser Warden");
    if let Some(dir) = browser_warden::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let config = AppConfig::load_or_init().with_env_overrides();

    // A headed browser needs a display. Default to :1 (the usual Xvfb
    // screen) when none is set, matching how the watchdog is deployed.
    if !config.headless {
        let has_display = std::env::var("DISPLAY")
            .map(|d| !d.is_empty())
            .unwrap_or(false);
        if !has_display {
            info!("No DISPLAY set - defaulting to :1 for the headed browser");
            std::env::set_var("DISPLAY", ":1");
        }
    }

    info!(
        "Probe every {}ms, stale threshold {}ms, relaunch cooldown {}ms",
        config.probe_interval_ms, config.stale_threshold_ms, config.cooldown_ms
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let launcher = BrowserLauncher::new(config.session_config());
    let supervisor = Supervisor::new(launcher, config.restart_policy(), shutdown_rx);

    supervisor.run().await.context("supervisor exited")?;

    Ok(())
}

/// Resolve on SIGINT or, on unix, SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
