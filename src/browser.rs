use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::surface::{BrowsingSurface, SurfaceError, SurfaceResult};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--no-sandbox",
];

/// Headless-browser implementation of [`BrowsingSurface`]. Owns the browser
/// process, its CDP event loop, and a single page.
pub struct MapBrowser {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl MapBrowser {
    pub async fn launch() -> Result<Self> {
        let config = BrowserConfig::builder()
            .window_size(1920, 1080)
            .args(LAUNCH_ARGS.iter().copied())
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {}", e))?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch the browser")?;

        // The handler stream ends when the CDP connection dies; that is the
        // liveness signal every surface call consults.
        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            flag.store(true, Ordering::SeqCst);
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to open a page")?;

        Ok(Self {
            browser,
            page,
            handler_task,
            closed,
        })
    }

    pub async fn close(mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Err(e) = self.browser.close().await {
            warn!("browser close failed: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        Ok(())
    }

    fn err(&self, e: impl std::fmt::Display) -> SurfaceError {
        if self.closed.load(Ordering::SeqCst) {
            SurfaceError::SessionClosed
        } else {
            SurfaceError::Surface(e.to_string())
        }
    }

    async fn find_all(&self, selector: &str) -> SurfaceResult<Vec<Element>> {
        self.page
            .find_elements(selector)
            .await
            .map_err(|e| self.err(e))
    }

    async fn find_nth(&self, selector: &str, index: usize) -> SurfaceResult<Element> {
        self.find_all(selector)
            .await?
            .into_iter()
            .nth(index)
            .ok_or_else(|| SurfaceError::Missing(format!("{}[{}]", selector, index)))
    }

    async fn child_of(
        &self,
        selector: &str,
        index: usize,
        child: &str,
    ) -> SurfaceResult<Option<Element>> {
        let parent = self.find_nth(selector, index).await?;
        let children = parent.find_elements(child).await.map_err(|e| self.err(e))?;
        Ok(children.into_iter().next())
    }
}

async fn with_timeout<T, F>(limit: Duration, fut: F) -> SurfaceResult<T>
where
    F: Future<Output = SurfaceResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SurfaceError::Timeout(limit)),
    }
}

/// Downgrade non-fatal read failures to an absent value. Extraction treats
/// missing text and attributes as data; only session loss propagates.
fn absent_on_failure<T: Default>(result: SurfaceResult<T>) -> SurfaceResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_fatal() => Err(e),
        Err(_) => Ok(T::default()),
    }
}

#[async_trait]
impl BrowsingSurface for MapBrowser {
    async fn goto(&self, url: &str, timeout: Duration) -> SurfaceResult<()> {
        with_timeout(timeout, async {
            self.page.goto(url).await.map(|_| ()).map_err(|e| self.err(e))
        })
        .await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> SurfaceResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_closed() {
                return Err(SurfaceError::SessionClosed);
            }
            if !self.find_all(selector).await?.is_empty() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SurfaceError::Timeout(timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn count(&self, selector: &str) -> SurfaceResult<usize> {
        Ok(self.find_all(selector).await?.len())
    }

    async fn scroll_to_bottom(&self, selector: &str) -> SurfaceResult<()> {
        let js = format!(
            "(() => {{ const el = document.querySelector({:?}); \
             if (el) {{ el.scrollTop = el.scrollHeight; }} }})()",
            selector
        );
        self.page
            .evaluate(js)
            .await
            .map(|_| ())
            .map_err(|e| self.err(e))
    }

    async fn scroll_into_view(&self, selector: &str, index: usize) -> SurfaceResult<()> {
        let element = self.find_nth(selector, index).await?;
        element
            .scroll_into_view()
            .await
            .map(|_| ())
            .map_err(|e| self.err(e))
    }

    async fn text_in(
        &self,
        selector: &str,
        index: usize,
        child: &str,
        timeout: Duration,
    ) -> SurfaceResult<Option<String>> {
        absent_on_failure(
            with_timeout(timeout, async {
                let Some(element) = self.child_of(selector, index, child).await? else {
                    return Ok(None);
                };
                element.inner_text().await.map_err(|e| self.err(e))
            })
            .await,
        )
    }

    async fn attr_in(
        &self,
        selector: &str,
        index: usize,
        child: &str,
        attr: &str,
        timeout: Duration,
    ) -> SurfaceResult<Vec<String>> {
        absent_on_failure(
            with_timeout(timeout, async {
                let parent = self.find_nth(selector, index).await?;
                let children = parent.find_elements(child).await.map_err(|e| self.err(e))?;
                let mut values = Vec::new();
                for element in children {
                    if let Some(value) = element.attribute(attr).await.map_err(|e| self.err(e))? {
                        values.push(value);
                    }
                }
                Ok(values)
            })
            .await,
        )
    }

    async fn click_in(
        &self,
        selector: &str,
        index: usize,
        child: &str,
        timeout: Duration,
    ) -> SurfaceResult<()> {
        with_timeout(timeout, async {
            let element = self
                .child_of(selector, index, child)
                .await?
                .ok_or_else(|| SurfaceError::Missing(format!("{} {}", selector, child)))?;
            element.click().await.map(|_| ()).map_err(|e| self.err(e))
        })
        .await
    }

    async fn text_first(&self, selector: &str, timeout: Duration) -> SurfaceResult<Option<String>> {
        absent_on_failure(
            with_timeout(timeout, async {
                let element = self.find_nth(selector, 0).await?;
                element.inner_text().await.map_err(|e| self.err(e))
            })
            .await,
        )
    }

    async fn attr_first(
        &self,
        selector: &str,
        attr: &str,
        timeout: Duration,
    ) -> SurfaceResult<Option<String>> {
        absent_on_failure(
            with_timeout(timeout, async {
                let element = self.find_nth(selector, 0).await?;
                element.attribute(attr).await.map_err(|e| self.err(e))
            })
            .await,
        )
    }

    async fn click_first(&self, selector: &str, timeout: Duration) -> SurfaceResult<()> {
        with_timeout(timeout, async {
            let element = self.find_nth(selector, 0).await?;
            element.click().await.map(|_| ()).map_err(|e| self.err(e))
        })
        .await
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
