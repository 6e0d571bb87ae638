//! Browser session management
//!
//! Handles launching and controlling the Chrome browser instance the
//! supervisor watches. A session pairs the browser process with its CDP
//! control channel; the two are created and destroyed together.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::errors::{AcquisitionError, ControlError};
use super::tools::{self, TOOL_NAMES};
use crate::supervisor::{ControlledSession, SessionLauncher};

/// Hard ceiling on the browser process start, independent of the
/// responsiveness check below.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(45);

/// Grace period between a graceful browser close and the force kill.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Find Chrome/Chromium executable on the system
fn find_chrome() -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = vec![
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(PathBuf::from(format!(
                r"{}\Google\Chrome\Application\chrome.exe",
                local
            )));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        )]
    } else {
        vec![
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/google-chrome-stable"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// Configuration for the supervised browser session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Path to Chrome/Chromium executable (auto-detected when unset)
    pub chrome_path: Option<String>,
    /// Run in headless mode
    pub headless: bool,
    /// Persistent profile directory, reused across relaunches
    pub profile_dir: PathBuf,
    /// Window width
    pub window_width: u32,
    /// Window height
    pub window_height: u32,
    /// How long a fresh browser gets to prove responsive
    pub stabilization: Duration,
    /// Page opened after each launch, best effort (None disables)
    pub start_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: false,
            profile_dir: std::env::temp_dir().join("browser-warden").join("profile"),
            window_width: 1920,
            window_height: 1080,
            stabilization: Duration::from_millis(2_000),
            start_url: None,
        }
    }
}

/// The supervised browser session: one Chrome process plus its CDP channel.
///
/// Owned exclusively by the supervisor. After [`BrowserSession::teardown`]
/// the handle stays inert: every invocation fails with
/// [`ControlError::NoPage`] and no browser resources remain behind it.
pub struct BrowserSession {
    /// The browser instance
    browser: RwLock<Option<Browser>>,
    /// The page all tool calls run against
    page: RwLock<Option<Page>>,
    /// CDP event drain; its end means Chrome disconnected
    handler_task: Mutex<Option<JoinHandle<()>>>,
    /// Whether the browser connection is still up
    alive: Arc<AtomicBool>,
}

impl BrowserSession {
    /// Launch the browser and attach the control channel.
    ///
    /// The browser must prove responsive (version answered, page adopted)
    /// within `config.stabilization`, otherwise the partial launch is torn
    /// down and the acquisition fails.
    pub async fn acquire(config: SessionConfig) -> Result<Self, AcquisitionError> {
        info!(
            "Launching browser session (headless: {}, profile: {})",
            config.headless,
            config.profile_dir.display()
        );

        if config.chrome_path.is_none() && find_chrome().is_none() {
            return Err(AcquisitionError::LaunchFailed(
                "Chrome/Chromium not found on this system".to_string(),
            ));
        }

        let mut builder = BrowserConfig::builder();

        if !config.headless {
            builder = builder.with_head();
        }

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        } else if let Some(chrome_path) = find_chrome() {
            info!("Auto-detected Chrome at: {}", chrome_path.display());
            builder = builder.chrome_executable(chrome_path);
        }

        std::fs::create_dir_all(&config.profile_dir)?;
        builder = builder.user_data_dir(&config.profile_dir);

        builder = builder
            .no_sandbox()
            .window_size(config.window_width, config.window_height)
            // A reused profile must come back without restore prompts
            .arg("--no-default-browser-check")
            .arg("--disable-session-crashed-bubble")
            .arg("--disable-restore-session-state")
            .arg("--homepage=about:blank");

        let browser_config = builder
            .build()
            .map_err(AcquisitionError::LaunchFailed)?;

        let (browser, mut handler) = tokio::time::timeout(LAUNCH_TIMEOUT, Browser::launch(browser_config))
            .await
            .map_err(|_| AcquisitionError::Unresponsive {
                waited_ms: LAUNCH_TIMEOUT.as_millis() as u64,
            })?
            .map_err(|e| AcquisitionError::LaunchFailed(e.to_string()))?;

        // Drain CDP events in the background. When the stream ends, Chrome
        // has disconnected or crashed and the session is no longer alive.
        let alive = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!("Browser event error: {}", err);
                    break;
                }
            }
            warn!("Browser disconnected (event handler ended)");
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        // Readiness: the browser must answer a version query and hand over a
        // page before the stabilization window runs out.
        let ready = tokio::time::timeout(config.stabilization, async {
            let version = browser
                .version()
                .await
                .map_err(|e| AcquisitionError::ConnectFailed(e.to_string()))?;

            // Chrome opens with a blank tab; adopt it rather than stacking
            // a new one on every relaunch.
            let mut pages = browser
                .pages()
                .await
                .map_err(|e| AcquisitionError::ConnectFailed(e.to_string()))?;

            let page = if pages.is_empty() {
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| AcquisitionError::ConnectFailed(e.to_string()))?
            } else {
                pages.remove(0)
            };

            for extra in pages {
                debug!("Closing extra blank tab");
                let _ = extra.close().await;
            }

            Ok::<_, AcquisitionError>((page, version.product))
        })
        .await;

        let (page, product) = match ready {
            Ok(Ok(adopted)) => adopted,
            Ok(Err(err)) => {
                dispose_partial(browser, &handler_task).await;
                return Err(err);
            }
            Err(_) => {
                dispose_partial(browser, &handler_task).await;
                return Err(AcquisitionError::Unresponsive {
                    waited_ms: config.stabilization.as_millis() as u64,
                });
            }
        };

        info!("Connected to {} (tools: {})", product, TOOL_NAMES.join(", "));

        if let Some(ref url) = config.start_url {
            match tokio::time::timeout(config.stabilization, page.goto(url.as_str())).await {
                Ok(Ok(_)) => info!("Opened start page {}", url),
                Ok(Err(e)) => warn!("Could not open start page {}: {}", url, e),
                Err(_) => warn!(
                    "Start page {} did not load within {}ms, continuing",
                    url,
                    config.stabilization.as_millis()
                ),
            }
        }

        info!("Browser session ready. Press Ctrl+C to close it.");

        Ok(Self {
            browser: RwLock::new(Some(browser)),
            page: RwLock::new(Some(page)),
            handler_task: Mutex::new(Some(handler_task)),
            alive,
        })
    }

    /// Ordered, best-effort teardown: page first, then the browser process,
    /// then the event drain. Errors are logged and swallowed so the failure
    /// path can always finish. Safe to call more than once.
    pub async fn close(&self) {
        // Mark as not alive first to stop new operations
        self.alive.store(false, Ordering::Relaxed);

        {
            let mut page = self.page.write().await;
            if let Some(p) = page.take() {
                if let Err(e) = p.close().await {
                    debug!("Page close failed: {}", e);
                }
            }
        }

        {
            let mut browser = self.browser.write().await;
            if let Some(mut b) = browser.take() {
                // Graceful close first, then force kill so no Chrome child
                // survives into the next launch against the same profile.
                if let Err(e) = b.close().await {
                    warn!("Browser close failed: {}", e);
                }
                tokio::time::sleep(CLOSE_GRACE).await;
                let _ = b.kill().await;
                let _ = b.wait().await;
            }
        }

        {
            let mut handler = self.handler_task.lock().await;
            if let Some(task) = handler.take() {
                task.abort();
            }
        }

        info!("Browser session closed");
    }
}

/// Kill a browser that failed its readiness check before a session existed.
async fn dispose_partial(mut browser: Browser, handler_task: &JoinHandle<()>) {
    warn!("Tearing down unresponsive browser");
    if let Err(e) = browser.close().await {
        debug!("Browser close failed: {}", e);
    }
    tokio::time::sleep(CLOSE_GRACE).await;
    let _ = browser.kill().await;
    let _ = browser.wait().await;
    handler_task.abort();
}

#[async_trait]
impl ControlledSession for BrowserSession {
    async fn invoke(
        &self,
        tool: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, ControlError> {
        let page = self.page.read().await;
        let page = page.as_ref().ok_or(ControlError::NoPage)?;

        tokio::time::timeout(timeout, tools::dispatch(page, tool, &args))
            .await
            .map_err(|_| ControlError::Timeout(timeout.as_millis() as u64))?
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn teardown(&self) {
        self.close().await;
    }
}

/// Launches [`BrowserSession`]s from a fixed config, initially and on every
/// relaunch after a failure.
pub struct BrowserLauncher {
    config: SessionConfig,
}

impl BrowserLauncher {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionLauncher for BrowserLauncher {
    type Session = BrowserSession;

    async fn acquire(&self) -> Result<BrowserSession, AcquisitionError> {
        BrowserSession::acquire(self.config.clone()).await
    }
}
