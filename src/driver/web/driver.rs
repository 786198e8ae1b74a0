//! Recorded page backed by Playwright
//!
//! Launches a browser, injects the listener script and pumps the in-page
//! event queue into the recorder's page event channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use playwright::api::{page, Browser, BrowserContext, Page, Viewport};
use playwright::Playwright;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::driver::traits::{BrowserPage, PageEvent};
use crate::recorder::network::document_url;
use crate::utils::config::RecorderConfig;

/// In-page action, mutation and network listeners
const LISTENERS_JS: &str = include_str!("listeners.js");

const DRAIN_JS: &str = "() => window.__lumiRecorder ? window.__lumiRecorder.drain() : []";

const COMPUTED_STYLE_JS: &str = "([selector, property]) => {
  const el = document.querySelector(selector);
  return el ? getComputedStyle(el).getPropertyValue(property) : null;
}";

/// How long `navigate_back` waits for the URL to change
const BACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Web browser type
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BrowserType {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

/// Browser launch settings
#[derive(Debug, Clone)]
pub struct WebPageConfig {
    pub browser_type: BrowserType,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub poll_interval: Duration,
}

impl From<&RecorderConfig> for WebPageConfig {
    fn from(config: &RecorderConfig) -> Self {
        Self {
            browser_type: config.browser,
            headless: config.headless,
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
            poll_interval: config.poll_interval(),
        }
    }
}

/// One browser page driven by Playwright
pub struct WebPage {
    #[allow(dead_code)]
    playwright: Arc<Playwright>,
    browser: Arc<Browser>,
    #[allow(dead_code)]
    context: Arc<BrowserContext>,
    page: Arc<Mutex<Page>>,
    init_script_added: AtomicBool,
    events: StdMutex<Option<mpsc::UnboundedReceiver<PageEvent>>>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl WebPage {
    /// Launch a browser and open an empty page
    pub async fn launch(config: WebPageConfig) -> Result<Self> {
        let playwright = Playwright::initialize()
            .await
            .context("Failed to initialize Playwright")?;

        let browser = match config.browser_type {
            BrowserType::Chromium => launch_chromium_browser(&playwright.chromium(), &config).await?,
            BrowserType::Firefox => {
                playwright
                    .firefox()
                    .launcher()
                    .headless(config.headless)
                    .launch()
                    .await?
            }
            BrowserType::Webkit => {
                playwright
                    .webkit()
                    .launcher()
                    .headless(config.headless)
                    .launch()
                    .await?
            }
        };

        let context = browser.context_builder().build().await?;
        let page = context.new_page().await?;
        page.set_viewport_size(Viewport {
            width: config.viewport_width as i32,
            height: config.viewport_height as i32,
        })
        .await?;

        let page = Arc::new(Mutex::new(page));
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = spawn_pump(page.clone(), tx, config.poll_interval).await?;

        info!("Launched {:?} (headless: {})", config.browser_type, config.headless);

        Ok(Self {
            playwright: Arc::new(playwright),
            browser: Arc::new(browser),
            context: Arc::new(context),
            page,
            init_script_added: AtomicBool::new(false),
            events: StdMutex::new(Some(rx)),
            pump: StdMutex::new(Some(pump)),
        })
    }
}

#[async_trait]
impl BrowserPage for WebPage {
    async fn load(&self, url: &str) -> Result<String> {
        let page = self.page.lock().await;
        page.goto_builder(url)
            .goto()
            .await
            .with_context(|| format!("Failed to navigate to {}", url))?;
        Ok(page.url()?)
    }

    async fn install_listeners(&self) -> Result<()> {
        let page = self.page.lock().await;
        if !self.init_script_added.swap(true, Ordering::SeqCst) {
            page.add_init_script(LISTENERS_JS).await?;
        }
        let script = LISTENERS_JS.trim_end().trim_end_matches(';');
        page.evaluate::<(), ()>(script, ()).await?;
        Ok(())
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<PageEvent>> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("Page event lock poisoned"))?
            .take()
            .ok_or_else(|| anyhow::anyhow!("Page events already subscribed"))
    }

    async fn computed_style(&self, selector: &str, property: &str) -> Result<Option<String>> {
        let page = self.page.lock().await;
        let value: Option<String> = page
            .evaluate(COMPUTED_STYLE_JS, (selector.to_string(), property.to_string()))
            .await?;
        Ok(value)
    }

    async fn current_url(&self) -> Result<String> {
        let page = self.page.lock().await;
        Ok(page.url()?)
    }

    async fn navigate_back(&self) -> Result<()> {
        let page = self.page.lock().await;
        let before = page.url()?;
        // The evaluate may race with the unload it triggers
        if let Err(e) = page.evaluate::<(), ()>("window.history.back()", ()).await {
            debug!("history.back() evaluate: {}", e);
        }

        let deadline = tokio::time::Instant::now() + BACK_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if document_url(&page.url()?) != document_url(&before) {
                return Ok(());
            }
        }
        anyhow::bail!("History did not go back within {}s", BACK_TIMEOUT.as_secs())
    }

    async fn close(&self) -> Result<()> {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(handle) = pump.take() {
                handle.abort();
            }
        }
        self.browser.close().await?;
        Ok(())
    }
}

/// Forward the in-page queue, URL changes and crashes into `tx`
async fn spawn_pump(
    page: Arc<Mutex<Page>>,
    tx: mpsc::UnboundedSender<PageEvent>,
    poll_interval: Duration,
) -> Result<JoinHandle<()>> {
    let mut browser_events = Box::pin(page.lock().await.subscribe_event()?);

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        let mut last_url: Option<String> = None;

        loop {
            tokio::select! {
                event = browser_events.next() => match event {
                    Some(Ok(page::Event::Crash)) => {
                        let _ = tx.send(PageEvent::Crashed { reason: "page crashed".to_string() });
                        break;
                    }
                    Some(Ok(page::Event::Close)) | None => {
                        let _ = tx.send(PageEvent::Crashed { reason: "page closed".to_string() });
                        break;
                    }
                    _ => {}
                },
                _ = ticker.tick() => {
                    if tx.is_closed() {
                        break;
                    }
                    let page = page.lock().await;

                    match page.evaluate::<(), Vec<serde_json::Value>>(DRAIN_JS, ()).await {
                        Ok(raw) => {
                            for value in raw {
                                match serde_json::from_value::<PageEvent>(value) {
                                    Ok(event) => {
                                        let _ = tx.send(event);
                                    }
                                    Err(e) => warn!("Dropping malformed page event: {}", e),
                                }
                            }
                        }
                        // Context destroyed mid-navigation; the next tick retries
                        Err(e) => debug!("Queue drain failed: {}", e),
                    }

                    if let Ok(url) = page.url() {
                        let changed = last_url
                            .as_deref()
                            .map_or(false, |last| document_url(last) != document_url(&url));
                        if changed {
                            debug!("Top-level URL changed to {}", url);
                            let _ = tx.send(PageEvent::Navigated { url: url.clone() });
                        }
                        if !url.starts_with("about:") {
                            last_url = Some(url);
                        }
                    }
                }
            }
        }
    }))
}

/// Launch a new Chromium browser, preferring a system installation
async fn launch_chromium_browser(
    chromium: &playwright::api::BrowserType,
    config: &WebPageConfig,
) -> Result<Browser> {
    let mut launcher = chromium.launcher();
    launcher = launcher.headless(config.headless);

    let env_path = std::env::var("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH")
        .ok()
        .map(std::path::PathBuf::from);

    let executable = env_path.or_else(find_system_browser);
    if let Some(ref path) = executable {
        info!("Using browser: {}", path.display());
        launcher = launcher.executable(path);
    } else {
        debug!("No browser executable found, using the Playwright default");
    }

    let args: Vec<String> = [
        "--no-sandbox",
        "--disable-setuid-sandbox",
        "--disable-dev-shm-usage",
        "--disable-gpu",
        "--ignore-certificate-errors",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    launcher = launcher.args(&args);

    Ok(launcher.launch().await?)
}

fn find_system_browser() -> Option<std::path::PathBuf> {
    let common_paths = [
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    common_paths
        .iter()
        .map(std::path::Path::new)
        .find(|p| p.exists())
        .map(|p| p.to_path_buf())
}
