//! Headless Chrome session backend.
//!
//! `headless_chrome` is a blocking API, so every call runs on the blocking
//! thread pool. Each session launches its own Chrome process so proxy
//! settings and browser state never leak between sub-tasks.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::{Network, Page};
use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::scraper::browser::{BrowserError, BrowserSession, SessionFactory, SessionSpec};
use crate::scraper::fingerprint::BLOCKED_RESOURCE_TYPES;

/// Chrome exits on its own if a session is leaked and left idle this long.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct ChromeConfig {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub navigation_timeout: Duration,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ChromeSessionFactory {
    config: ChromeConfig,
}

impl ChromeSessionFactory {
    pub fn new(config: ChromeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn open(&self, spec: SessionSpec) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let config = self.config.clone();
        let (browser, tab) = tokio::task::spawn_blocking(move || launch(&config, &spec))
            .await
            .map_err(|e| BrowserError::Task(e.to_string()))??;

        Ok(Box::new(ChromeSession {
            browser: Mutex::new(Some(browser)),
            tab,
        }))
    }
}

/// URL patterns covering the blocked resource types. The DevTools blocklist
/// matches URLs, not resource types, so each type maps to its usual file
/// extensions.
fn blocked_url_patterns() -> Vec<String> {
    BLOCKED_RESOURCE_TYPES
        .iter()
        .flat_map(|kind| {
            let extensions: &[&str] = match *kind {
                "Image" => &["png", "jpg", "jpeg", "gif", "webp", "svg", "ico"],
                "Font" => &["woff", "woff2", "ttf", "otf", "eot"],
                "Media" => &["mp4", "webm", "mp3", "ogg", "wav"],
                _ => &[],
            };
            extensions.iter().map(|ext| format!("*.{ext}*"))
        })
        .collect()
}

fn launch_err(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Launch(e.to_string())
}

fn launch(config: &ChromeConfig, spec: &SessionSpec) -> Result<(Browser, Arc<Tab>), BrowserError> {
    let fingerprint = &spec.fingerprint;
    let proxy_server = spec.proxy.as_ref().map(|p| p.server());

    let options = LaunchOptions::default_builder()
        .headless(config.headless)
        .sandbox(false)
        .path(config.chrome_path.clone())
        .window_size(Some((fingerprint.viewport.width, fingerprint.viewport.height)))
        .proxy_server(proxy_server.as_deref())
        .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
        .build()
        .map_err(launch_err)?;

    let browser = Browser::new(options).map_err(launch_err)?;
    let tab = browser.new_tab().map_err(launch_err)?;
    tab.set_default_timeout(config.navigation_timeout);

    let accept_language = fingerprint.languages.join(",");
    tab.set_user_agent(&fingerprint.user_agent, Some(&accept_language), None)
        .map_err(launch_err)?;

    // Registered before the first navigation so it runs ahead of every page
    // script on every document the tab loads.
    tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
        source: fingerprint.init_script(),
        world_name: None,
        include_command_line_api: None,
        run_immediately: None,
    })
    .map_err(launch_err)?;

    tab.call_method(Network::SetBlockedURLs {
        urls: blocked_url_patterns(),
    })
    .map_err(launch_err)?;

    if let Some(proxy) = &spec.proxy {
        if !proxy.username.is_empty() {
            tab.enable_fetch(None, Some(true)).map_err(launch_err)?;
            tab.authenticate(Some(proxy.username.clone()), Some(proxy.password.clone()))
                .map_err(launch_err)?;
        }
    }

    Ok((browser, tab))
}

pub struct ChromeSession {
    /// Dropping the browser kills the Chrome process.
    browser: Mutex<Option<Browser>>,
    tab: Arc<Tab>,
}

impl ChromeSession {
    async fn blocking<T, F>(&self, f: F) -> Result<T, BrowserError>
    where
        F: FnOnce(&Tab) -> Result<T, BrowserError> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| BrowserError::Task(e.to_string()))?
    }
}

fn element_err(selector: &str, e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Element {
        selector: selector.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url)
                .and_then(|t| t.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| BrowserError::Navigation {
                    url: url.clone(),
                    reason: e.to_string(),
                })
        })
        .await
    }

    async fn type_into(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let selector = selector.to_string();
        let text = text.to_string();
        self.blocking(move |tab| {
            let element = tab
                .wait_for_element(&selector)
                .map_err(|e| element_err(&selector, e))?;
            element.click().map_err(|e| element_err(&selector, e))?;
            element.type_into(&text).map_err(|e| element_err(&selector, e))?;
            Ok(())
        })
        .await
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            tab.wait_for_element(&selector)
                .and_then(|el| el.click().map(|_| ()))
                .map_err(|e| element_err(&selector, e))
        })
        .await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool, BrowserError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            Ok(tab
                .wait_for_element_with_custom_timeout(&selector, timeout)
                .is_ok())
        })
        .await
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.blocking(|tab| tab.get_content().map_err(|e| BrowserError::Protocol(e.to_string())))
            .await
    }

    async fn close(&self) {
        let browser = self
            .browser
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let tab = self.tab.clone();

        let closed = tokio::task::spawn_blocking(move || {
            if let Err(e) = tab.close(false) {
                tracing::debug!(error = %e, "Tab close failed");
            }
            drop(browser);
        })
        .await;
        if let Err(e) = closed {
            tracing::warn!(error = %e, "Browser shutdown task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::fingerprint::FingerprintGenerator;

    #[test]
    fn test_blocked_patterns_cover_every_type() {
        let patterns = blocked_url_patterns();
        assert!(patterns.contains(&"*.png*".to_string()));
        assert!(patterns.contains(&"*.woff2*".to_string()));
        assert!(patterns.contains(&"*.mp4*".to_string()));
        assert!(!patterns.iter().any(|p| p.contains("js")));
    }

    #[test]
    #[ignore] // Requires a local Chrome install
    fn test_fingerprint_visible_to_inline_page_script() {
        let spec = SessionSpec {
            fingerprint: FingerprintGenerator::default().generate(),
            proxy: None,
        };
        let (_browser, tab) = launch(&ChromeConfig::default(), &spec).unwrap();

        tab.navigate_to(
            "data:text/html,<script>document.title=navigator.plugins.length+'/'+navigator.languages.join()</script>",
        )
        .unwrap()
        .wait_until_navigated()
        .unwrap();

        let expected = format!(
            "{}/{}",
            spec.fingerprint.plugin_count,
            spec.fingerprint.languages.join(",")
        );
        assert_eq!(tab.get_title().unwrap(), expected);
    }

    #[tokio::test]
    #[ignore] // Requires a local Chrome install
    async fn test_open_and_load_page() {
        let factory = ChromeSessionFactory::new(ChromeConfig::default());
        let session = factory
            .open(SessionSpec {
                fingerprint: FingerprintGenerator::default().generate(),
                proxy: None,
            })
            .await
            .unwrap();

        session.goto("https://example.com").await.unwrap();
        assert!(session.wait_for("h1", Duration::from_secs(5)).await.unwrap());
        assert!(session.content().await.unwrap().contains("Example Domain"));
        session.close().await;
    }
}
