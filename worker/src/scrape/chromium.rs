//! Sesión sobre Chromium vía chromiumoxide.

use super::session::BrowserSession;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Busca el binario de Chromium: `SCRAPER_CHROMIUM_PATH`, caché local y PATH.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("SCRAPER_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        for c in [
            home.join(".cache/chromium/chrome-linux64/chrome"),
            home.join(".cache/chromium/chrome"),
        ] {
            if c.exists() {
                return Some(c);
            }
        }
    }

    for bin in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(bin) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

pub struct ChromiumSession {
    // El browser tiene que vivir mientras viva la página.
    _browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromiumSession {
    /// Lanza Chromium y abre una pestaña en blanco.
    ///
    /// Sin `headless` la ventana queda visible para resolver CAPTCHAs a mano.
    pub async fn launch(headless: bool) -> Result<Self> {
        let chrome_path = find_chromium()
            .context("no se encontró Chromium; definir SCRAPER_CHROMIUM_PATH")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--window-size=1920,1080");
        if !headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("configuración de browser inválida: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("no se pudo lanzar Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("evento CDP con error: {e}");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("no se pudo abrir una pestaña")?;

        info!("Chromium listo (headless={})", headless);
        Ok(Self {
            _browser: browser,
            page,
            handler,
        })
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {}ms", timeout.as_millis()),
        }
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;
        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn html(&mut self) -> Result<String> {
        let result = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .context("failed to get HTML")?;
        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert HTML result: {e:?}"))
    }

    async fn click(&mut self, selector: &str) -> Result<bool> {
        let Ok(el) = self.page.find_element(selector).await else {
            return Ok(false);
        };
        el.click().await.context("click failed")?;
        Ok(true)
    }

    async fn type_char(&mut self, selector: &str, c: char) -> Result<()> {
        let el = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("no element matches {selector}"))?;
        el.focus().await?;
        el.type_str(c.to_string()).await?;
        Ok(())
    }

    async fn press_enter(&mut self, selector: &str) -> Result<()> {
        let el = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("no element matches {selector}"))?;
        el.press_key("Enter").await?;
        Ok(())
    }
}
