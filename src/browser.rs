use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use crate::action::Locator;
use crate::agent::Computer;
use crate::dom::PageTree;
use crate::error::ComputerError;

/// Serializes the document into a [`PageTree`]; `null` while the page is still loading.
const PAGE_TREE_JS: &str = r#"
(() => {
  if (document.readyState === 'loading' || !document.documentElement) return JSON.stringify(null);
  const KEEP = ['id', 'name', 'class', 'href', 'type', 'placeholder', 'aria-label', 'role',
                'title', 'alt', 'tabindex', 'contenteditable', 'onclick'];
  const OPAQUE = new Set(['script', 'style', 'svg', 'noscript', 'template', 'iframe', 'canvas']);
  const isVisible = (el, tag) => {
    if (tag === 'html' || tag === 'body') return true;
    const style = window.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden') return false;
    // Layout-less wrappers have no boxes of their own but render their children.
    if (style.display === 'contents') return true;
    return el.getClientRects().length > 0;
  };
  const walk = (el) => {
    const tag = el.tagName.toLowerCase();
    const attrs = {};
    for (const name of KEEP) {
      const v = el.getAttribute(name);
      if (v !== null) attrs[name] = v;
    }
    if ((tag === 'input' || tag === 'textarea') && el.type !== 'password' && el.value) {
      attrs.value = String(el.value);
    }
    const node = { kind: 'element', tag, attrs, visible: isVisible(el, tag), children: [] };
    if (el.id && document.querySelectorAll('#' + CSS.escape(el.id)).length > 1) node.shared_id = true;
    if (OPAQUE.has(tag) || !node.visible) return node;
    for (const child of el.childNodes) {
      if (child.nodeType === 1) node.children.push(walk(child));
      else if (child.nodeType === 3 && child.textContent.trim()) {
        node.children.push({ kind: 'text', text: child.textContent });
      }
    }
    return node;
  };
  return JSON.stringify({ url: location.href, title: document.title, root: walk(document.documentElement) });
})()
"#;

#[derive(Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub viewport: (u32, u32),
    /// How long a locator may take to appear before it counts as stale.
    pub resolve_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: None,
            viewport: (1280, 720),
            resolve_timeout: Duration::from_secs(2),
        }
    }
}

pub struct Browser {
    page: Page,
    browser: OxideBrowser,
    handler: JoinHandle<()>,
    resolve_timeout: Duration,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Fresh profile per run so concurrent runs never share a profile lock.
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("glass-scout-profile-{}-{}", std::process::id(), ts));
        std::fs::create_dir_all(&profile_dir)?;
        let bcfg = builder
            .user_data_dir(profile_dir)
            .window_size(cfg.viewport.0, cfg.viewport.1)
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-blink-features=AutomationControlled")
            .build()
            .map_err(|e| anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        let handler = tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = cfg.user_agent {
            page.set_user_agent(ua).await?;
        }
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(cfg.viewport.0 as i64)
            .height(cfg.viewport.1 as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| anyhow!(e))?;
        page.execute(metrics).await?;
        Ok(Self { page, browser, handler, resolve_timeout: cfg.resolve_timeout })
    }

    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await?;
        self.handler.abort();
        Ok(())
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    pub async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    /// Evaluate a script that returns a JSON string and decode it.
    async fn eval_json<T: DeserializeOwned>(&self, js: String) -> Result<T> {
        let raw: String = self.page.evaluate(js).await?.into_value()?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn page_tree(&self) -> Result<Option<PageTree>> {
        self.eval_json(PAGE_TREE_JS.to_string()).await
    }

    /// Poll for `selector` until it matches or the resolve window closes.
    pub async fn resolve(&self, selector: &str) -> Result<bool> {
        let quoted = serde_json::to_string(selector)?;
        let js = format!("JSON.stringify(document.querySelector({quoted}) !== null)");
        let deadline = Instant::now() + self.resolve_timeout;
        loop {
            if self.eval_json::<bool>(js.clone()).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn click(&self, selector: &str) -> Result<()> {
        let element = self.page.find_element(selector).await?;
        element.scroll_into_view().await?;
        element.click().await?;
        Ok(())
    }

    /// Replace the field's content with `text`.
    pub async fn fill(&self, selector: &str, text: &str) -> Result<()> {
        let quoted = serde_json::to_string(selector)?;
        let clear = format!(
            "(() => {{ const el = document.querySelector({quoted}); \
             if (el && 'value' in el) {{ el.value = ''; el.dispatchEvent(new Event('input', {{bubbles: true}})); }} \
             return JSON.stringify(true); }})()"
        );
        self.eval_json::<bool>(clear).await?;
        let element = self.page.find_element(selector).await?;
        element.click().await?;
        element.type_str(text).await?;
        Ok(())
    }

    pub async fn scroll(&self, dy: i64) -> Result<()> {
        let eval = EvaluateParams::builder()
            .expression(format!("window.scrollBy(0, {dy});"))
            .build()
            .map_err(|e| anyhow!(e))?;
        self.page.execute(eval).await?;
        Ok(())
    }

    /// Wait for `readyState == "complete"`, then a short quiet period for late content.
    pub async fn wait_for_stable(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let js = "JSON.stringify(document.readyState)".to_string();
        while Instant::now() < deadline {
            if let Ok(state) = self.eval_json::<String>(js.clone()).await {
                if state == "complete" {
                    sleep(Duration::from_millis(400).min(deadline.saturating_duration_since(Instant::now())))
                        .await;
                    return Ok(());
                }
            }
            sleep(Duration::from_millis(100)).await;
        }
        Err(anyhow!("page still loading after {:?}", timeout))
    }
}

// ========================= Computer Adapter =========================

pub struct ChromiumComputer {
    browser: Browser,
}

impl ChromiumComputer {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self, ComputerError> {
        let browser = Browser::launch(cfg)
            .await
            .map_err(|e| ComputerError::Driver(e.to_string()))?;
        Ok(Self { browser })
    }

    pub async fn close(self) -> Result<(), ComputerError> {
        self.browser
            .close()
            .await
            .map_err(|e| ComputerError::Driver(e.to_string()))
    }

    async fn require(&self, target: &Locator) -> Result<(), ComputerError> {
        let found = self
            .browser
            .resolve(target.as_str())
            .await
            .map_err(|e| ComputerError::Driver(e.to_string()))?;
        if found {
            Ok(())
        } else {
            Err(ComputerError::NotFound(target.clone()))
        }
    }
}

#[async_trait]
impl Computer for ChromiumComputer {
    async fn open_url(&self, url: &str) -> Result<(), ComputerError> {
        self.browser
            .goto(url)
            .await
            .map_err(|e| ComputerError::Driver(e.to_string()))
    }

    async fn page_tree(&self) -> Result<PageTree, ComputerError> {
        let tree = self
            .browser
            .page_tree()
            .await
            .map_err(|e| ComputerError::Driver(e.to_string()))?;
        match tree {
            Some(tree) => Ok(tree),
            None => {
                let url = self.browser.url().await.unwrap_or_default();
                debug!(url = %url, "document still loading");
                Err(ComputerError::PageBusy)
            }
        }
    }

    async fn click(&self, target: &Locator) -> Result<(), ComputerError> {
        self.require(target).await?;
        self.browser
            .click(target.as_str())
            .await
            .map_err(|e| ComputerError::Rejected(e.to_string()))
    }

    async fn type_text(&self, target: &Locator, text: &str) -> Result<(), ComputerError> {
        self.require(target).await?;
        self.browser
            .fill(target.as_str(), text)
            .await
            .map_err(|e| ComputerError::Rejected(e.to_string()))
    }

    async fn scroll(&self, dy: i64) -> Result<(), ComputerError> {
        self.browser
            .scroll(dy)
            .await
            .map_err(|e| ComputerError::Rejected(e.to_string()))
    }

    async fn wait_for_stable(&self, timeout: Duration) -> Result<(), ComputerError> {
        self.browser
            .wait_for_stable(timeout)
            .await
            .map_err(|_| ComputerError::Timeout(timeout))
    }
}
