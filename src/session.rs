use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use crate::parse::{parse_period, truncate_description};
use crate::surface::{BrowsingSurface, SurfaceError};

/// One freshly scraped listing, not yet verified against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub name: String,
    pub address: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub description: String,
    pub images: Vec<String>,
}

/// Totals reported once a keyword has been crawled to the last page.
#[derive(Debug, Clone, Copy)]
pub struct SessionStats {
    pub total_count: usize,
    pub page_count: u32,
}

/// Receives each page batch as soon as it is extracted. The session awaits
/// the sink before touching the next page, so at most one page of work is
/// ever in flight unpersisted.
#[async_trait]
pub trait PageSink {
    async fn on_page(&mut self, batch: Vec<CandidateRecord>) -> Result<()>;
}

/// CSS selectors for the search view. Site markup churns; everything the
/// session touches is routed through this one struct.
#[derive(Debug, Clone)]
pub struct Selectors {
    pub result_list: String,
    pub list_item: String,
    pub item_name: String,
    pub item_period: String,
    pub item_image: String,
    pub detail_address: String,
    pub detail_description: String,
    pub detail_close: String,
    pub detail_back: String,
    pub next_page: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            result_list: "div.Ryr1F".to_string(),
            list_item: "li.guugO".to_string(),
            item_name: "span.QeVJ4".to_string(),
            item_period: "span.tTTdX time".to_string(),
            item_image: "div.YYh8o img.K0PDV".to_string(),
            detail_address: "span.LDgIH".to_string(),
            detail_description: "div.RoqbX".to_string(),
            detail_close: "a.mKQJy".to_string(),
            detail_back: "button[aria-label='뒤로가기']".to_string(),
            next_page: "a.eUTV2".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub selectors: Selectors,
    pub nav_timeout: Duration,
    pub container_timeout: Duration,
    pub field_timeout: Duration,
    pub click_timeout: Duration,
    pub close_timeout: Duration,
    pub recover_timeout: Duration,
    pub item_timeout: Duration,
    pub scroll_settle: Duration,
    pub detail_settle: Duration,
    pub max_scroll_attempts: usize,
    pub max_consecutive_failures: usize,
    pub max_images: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://map.naver.com/p/search".to_string(),
            selectors: Selectors::default(),
            nav_timeout: Duration::from_secs(10),
            container_timeout: Duration::from_secs(30),
            field_timeout: Duration::from_secs(10),
            click_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(3),
            recover_timeout: Duration::from_secs(10),
            item_timeout: Duration::from_secs(30),
            scroll_settle: Duration::from_millis(500),
            detail_settle: Duration::from_millis(300),
            max_scroll_attempts: 10,
            max_consecutive_failures: 5,
            max_images: 1,
        }
    }
}

/// Drives one browsing session over one search keyword, page by page.
/// Items are processed serially: the surface is a single shared view and
/// concurrent navigation would corrupt its list scroll state.
pub struct ExtractionSession<'a, S> {
    surface: &'a S,
    config: SessionConfig,
}

impl<'a, S: BrowsingSurface> ExtractionSession<'a, S> {
    pub fn new(surface: &'a S, config: SessionConfig) -> Self {
        Self { surface, config }
    }

    /// Crawl every result page for `keyword`, yielding each page batch to
    /// `sink` before moving on.
    pub async fn run(&self, keyword: &str, sink: &mut dyn PageSink) -> Result<SessionStats> {
        let url = search_url(&self.config.base_url, keyword)?;
        self.surface
            .goto(url.as_str(), self.config.nav_timeout)
            .await
            .context("failed to open the search view")?;
        self.surface
            .wait_for(&self.config.selectors.list_item, self.config.container_timeout)
            .await
            .context("search results never appeared")?;

        let mut total_count = 0;
        let mut page_count = 0u32;
        loop {
            page_count += 1;
            let batch = self.extract_page(page_count).await?;
            total_count += batch.len();
            info!(
                "page {}: {} records extracted, handing off",
                page_count,
                batch.len()
            );
            sink.on_page(batch).await?;

            if !self.advance_page().await? {
                break;
            }
        }

        info!(
            "crawl finished: {} records over {} pages",
            total_count, page_count
        );
        Ok(SessionStats {
            total_count,
            page_count,
        })
    }

    /// Scroll the lazily loaded result list until the visible item count
    /// stops growing (stable across two consecutive samples), bounded by
    /// `max_scroll_attempts`.
    async fn stabilize_scroll(&self) -> Result<(), SurfaceError> {
        let sel = &self.config.selectors;
        let mut previous = 0usize;
        let mut stable = 0u32;
        for _ in 0..self.config.max_scroll_attempts {
            if let Err(e) = self.surface.scroll_to_bottom(&sel.result_list).await {
                if e.is_fatal() {
                    return Err(e);
                }
            }
            tokio::time::sleep(self.config.scroll_settle).await;

            let current = self.surface.count(&sel.list_item).await?;
            if current == previous {
                stable += 1;
                if stable >= 2 {
                    debug!("result list stable at {} items", current);
                    break;
                }
            } else {
                stable = 0;
            }
            previous = current;
        }
        Ok(())
    }

    async fn extract_page(&self, page: u32) -> Result<Vec<CandidateRecord>, SurfaceError> {
        self.stabilize_scroll().await?;

        let sel = &self.config.selectors;
        let count = self.surface.count(&sel.list_item).await?;
        let mut batch = Vec::new();
        let mut consecutive_failures = 0usize;

        for i in 0..count {
            if self.surface.is_closed() {
                return Err(SurfaceError::SessionClosed);
            }
            if consecutive_failures >= self.config.max_consecutive_failures {
                warn!(
                    "page {}: {} consecutive failures, moving to the next page",
                    page, consecutive_failures
                );
                break;
            }

            let started = Instant::now();
            match tokio::time::timeout(self.config.item_timeout, self.extract_item(i)).await {
                Ok(Ok(record)) => {
                    info!(
                        "page {} [{}/{}] {} ({} ms)",
                        page,
                        i + 1,
                        count,
                        record.name,
                        started.elapsed().as_millis()
                    );
                    batch.push(record);
                    consecutive_failures = 0;
                }
                Ok(Err(e)) if e.is_fatal() => return Err(e),
                Ok(Err(e)) => {
                    consecutive_failures += 1;
                    warn!(
                        "page {} [{}/{}] skipped: {} (consecutive {}/{})",
                        page,
                        i + 1,
                        count,
                        e,
                        consecutive_failures,
                        self.config.max_consecutive_failures
                    );
                }
                Err(_) => {
                    consecutive_failures += 1;
                    warn!(
                        "page {} [{}/{}] skipped: item timed out after {:?} (consecutive {}/{})",
                        page,
                        i + 1,
                        count,
                        self.config.item_timeout,
                        consecutive_failures,
                        self.config.max_consecutive_failures
                    );
                }
            }
        }

        Ok(batch)
    }

    async fn extract_item(&self, index: usize) -> Result<CandidateRecord, SurfaceError> {
        let cfg = &self.config;
        let sel = &cfg.selectors;

        let name = self
            .surface
            .text_in(&sel.list_item, index, &sel.item_name, cfg.field_timeout)
            .await?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("item_{}", index));

        let period = self
            .surface
            .text_in(&sel.list_item, index, &sel.item_period, cfg.field_timeout)
            .await?;
        let (start_date, end_date) = period
            .as_deref()
            .map(parse_period)
            .unwrap_or((None, None));

        // Image URLs lazy-load; bring the card into view first.
        if let Err(e) = self.surface.scroll_into_view(&sel.list_item, index).await {
            if e.is_fatal() {
                return Err(e);
            }
        }
        tokio::time::sleep(cfg.detail_settle).await;
        let mut images = match self
            .surface
            .attr_in(&sel.list_item, index, &sel.item_image, "src", cfg.field_timeout)
            .await
        {
            Ok(urls) => urls,
            Err(e) if e.is_fatal() => return Err(e),
            Err(_) => Vec::new(),
        };
        images.retain(|u| u.starts_with("http"));
        images.truncate(cfg.max_images);

        // Open the detail view. The title is the primary click target; any
        // anchor inside the card works as a fallback.
        if let Err(e) = self
            .surface
            .click_in(&sel.list_item, index, &sel.item_name, cfg.click_timeout)
            .await
        {
            if e.is_fatal() {
                return Err(e);
            }
            self.surface
                .click_in(&sel.list_item, index, "a", cfg.click_timeout)
                .await?;
        }

        tokio::time::sleep(cfg.detail_settle).await;
        let address = self
            .surface
            .text_first(&sel.detail_address, cfg.field_timeout)
            .await?
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        tokio::time::sleep(cfg.detail_settle).await;
        let description = self
            .surface
            .text_first(&sel.detail_description, cfg.field_timeout)
            .await?
            .map(|s| truncate_description(&s))
            .unwrap_or_default();

        self.close_detail().await?;

        Ok(CandidateRecord {
            name,
            address,
            start_date,
            end_date,
            description,
            images,
        })
    }

    /// Close the detail view and confirm the result list is back. Skipping
    /// the confirmation corrupts every later index on the page.
    async fn close_detail(&self) -> Result<(), SurfaceError> {
        let cfg = &self.config;
        let sel = &cfg.selectors;

        let mut closed = false;
        match self.surface.count(&sel.detail_close).await {
            Ok(n) if n > 0 => {
                match self
                    .surface
                    .click_first(&sel.detail_close, cfg.close_timeout)
                    .await
                {
                    Ok(()) => closed = true,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => debug!("close control failed: {}", e),
                }
            }
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!("close control lookup failed: {}", e),
        }
        if !closed {
            match self
                .surface
                .click_first(&sel.detail_back, cfg.close_timeout)
                .await
            {
                Ok(()) => closed = true,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!("back control failed: {}", e),
            }
        }
        if !closed {
            warn!("could not close the detail view");
            return Ok(());
        }

        self.surface
            .wait_for(&sel.list_item, cfg.recover_timeout)
            .await?;
        tokio::time::sleep(cfg.detail_settle).await;
        Ok(())
    }

    /// Returns false when the last page has been reached.
    async fn advance_page(&self) -> Result<bool, SurfaceError> {
        let cfg = &self.config;
        let sel = &cfg.selectors;

        if self.surface.count(&sel.next_page).await? == 0 {
            info!("last page reached");
            return Ok(false);
        }
        if let Some(disabled) = self
            .surface
            .attr_first(&sel.next_page, "aria-disabled", cfg.field_timeout)
            .await?
        {
            if disabled == "true" {
                info!("last page reached");
                return Ok(false);
            }
        }

        self.surface
            .click_first(&sel.next_page, cfg.click_timeout)
            .await?;
        match self
            .surface
            .wait_for(&sel.list_item, cfg.recover_timeout)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            // The stabilization pass on the next page retries anyway.
            Err(e) => debug!("list did not repopulate promptly: {}", e),
        }
        Ok(true)
    }
}

fn search_url(base: &str, keyword: &str) -> Result<Url> {
    let mut url = Url::parse(base).context("invalid search base url")?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("search base url cannot carry path segments"))?
        .push(keyword);
    Ok(url)
}

// ── Tests ──
