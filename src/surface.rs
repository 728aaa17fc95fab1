use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure kinds a browsing surface can report. The surface implementation
/// decides the kind; callers branch on `is_fatal()` instead of inspecting
/// message text.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("no element matches selector {0:?}")]
    Missing(String),
    #[error("browsing session closed")]
    SessionClosed,
    #[error("browsing surface failure: {0}")]
    Surface(String),
}

impl SurfaceError {
    /// Fatal errors abort the whole extraction session; everything else is
    /// a per-item (or per-call) condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SurfaceError::SessionClosed)
    }
}

pub type SurfaceResult<T> = Result<T, SurfaceError>;

/// The browsing primitive the extraction session drives: navigation, scoped
/// element location by selector, text/attribute reads, clicks, and a
/// liveness probe.
///
/// Contract notes:
/// - `text_in`/`text_first`/`attr_first` resolve to `Ok(None)` (and `attr_in`
///   to an empty list) when the element is absent or the read times out,
///   so extraction code can treat missing fields as data, not errors.
/// - `click_*` and `wait_for` report timeouts as `Err(Timeout)`.
/// - Once the underlying session is gone every call returns `SessionClosed`
///   and `is_closed()` flips to true.
#[async_trait]
pub trait BrowsingSurface: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> SurfaceResult<()>;

    /// Wait until at least one element matches `selector`.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> SurfaceResult<()>;

    /// Number of elements currently matching `selector`.
    async fn count(&self, selector: &str) -> SurfaceResult<usize>;

    /// Scroll the matched container to its bottom.
    async fn scroll_to_bottom(&self, selector: &str) -> SurfaceResult<()>;

    /// Bring the nth match of `selector` into the viewport.
    async fn scroll_into_view(&self, selector: &str, index: usize) -> SurfaceResult<()>;

    /// Inner text of the first `child` match inside the nth `selector` match.
    async fn text_in(
        &self,
        selector: &str,
        index: usize,
        child: &str,
        timeout: Duration,
    ) -> SurfaceResult<Option<String>>;

    /// Attribute values of all `child` matches inside the nth `selector` match.
    async fn attr_in(
        &self,
        selector: &str,
        index: usize,
        child: &str,
        attr: &str,
        timeout: Duration,
    ) -> SurfaceResult<Vec<String>>;

    /// Click the first `child` match inside the nth `selector` match.
    async fn click_in(
        &self,
        selector: &str,
        index: usize,
        child: &str,
        timeout: Duration,
    ) -> SurfaceResult<()>;

    /// Inner text of the first match of `selector`.
    async fn text_first(&self, selector: &str, timeout: Duration) -> SurfaceResult<Option<String>>;

    /// Attribute value of the first match of `selector`.
    async fn attr_first(
        &self,
        selector: &str,
        attr: &str,
        timeout: Duration,
    ) -> SurfaceResult<Option<String>>;

    /// Click the first match of `selector`.
    async fn click_first(&self, selector: &str, timeout: Duration) -> SurfaceResult<()>;

    /// True once the underlying session has been torn down or lost.
    fn is_closed(&self) -> bool;
}

// ── Scripted surface for tests ──

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{BrowsingSurface, SurfaceError, SurfaceResult};
    use crate::session::Selectors;

    #[derive(Clone, Default)]
    pub(crate) struct ScriptedItem {
        pub name: Option<String>,
        pub period: Option<String>,
        pub images: Vec<String>,
        pub address: String,
        pub description: String,
        /// Every click on this item fails, so its extraction fails.
        pub fail_click: bool,
    }

    impl ScriptedItem {
        pub(crate) fn named(name: &str, period: &str) -> Self {
            Self {
                name: Some(name.to_string()),
                period: Some(period.to_string()),
                address: format!("{} road 1", name),
                description: format!("{} pop-up", name),
                ..Self::default()
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                name: Some("broken".to_string()),
                fail_click: true,
                ..Self::default()
            }
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct ScriptedPage {
        pub items: Vec<ScriptedItem>,
    }

    #[derive(Default)]
    struct State {
        page: usize,
        detail: Option<usize>,
    }

    pub(crate) struct ScriptedSurface {
        selectors: Selectors,
        pages: Vec<ScriptedPage>,
        state: Mutex<State>,
        closed: AtomicBool,
        /// Simulate the browser dying when this item index is clicked.
        close_on_item: Option<usize>,
    }

    impl ScriptedSurface {
        pub(crate) fn new(pages: Vec<ScriptedPage>) -> Self {
            Self {
                selectors: Selectors::default(),
                pages,
                state: Mutex::new(State::default()),
                closed: AtomicBool::new(false),
                close_on_item: None,
            }
        }

        pub(crate) fn closing_on_item(mut self, index: usize) -> Self {
            self.close_on_item = Some(index);
            self
        }

        fn guard(&self) -> SurfaceResult<()> {
            if self.is_closed() {
                Err(SurfaceError::SessionClosed)
            } else {
                Ok(())
            }
        }

        fn item(&self, index: usize) -> SurfaceResult<ScriptedItem> {
            let state = self.state.lock().unwrap();
            self.pages[state.page]
                .items
                .get(index)
                .cloned()
                .ok_or_else(|| SurfaceError::Missing(format!("item {}", index)))
        }
    }

    #[async_trait]
    impl BrowsingSurface for ScriptedSurface {
        async fn goto(&self, _url: &str, _timeout: Duration) -> SurfaceResult<()> {
            self.guard()
        }

        async fn wait_for(&self, _selector: &str, _timeout: Duration) -> SurfaceResult<()> {
            self.guard()
        }

        async fn count(&self, selector: &str) -> SurfaceResult<usize> {
            self.guard()?;
            let state = self.state.lock().unwrap();
            if selector == self.selectors.list_item {
                Ok(self.pages[state.page].items.len())
            } else if selector == self.selectors.next_page {
                Ok(usize::from(state.page + 1 < self.pages.len()))
            } else if selector == self.selectors.detail_close {
                Ok(1)
            } else {
                Ok(0)
            }
        }

        async fn scroll_to_bottom(&self, _selector: &str) -> SurfaceResult<()> {
            self.guard()
        }

        async fn scroll_into_view(&self, _selector: &str, _index: usize) -> SurfaceResult<()> {
            self.guard()
        }

        async fn text_in(
            &self,
            _selector: &str,
            index: usize,
            child: &str,
            _timeout: Duration,
        ) -> SurfaceResult<Option<String>> {
            self.guard()?;
            let item = self.item(index)?;
            if child == self.selectors.item_name {
                Ok(item.name)
            } else if child == self.selectors.item_period {
                Ok(item.period)
            } else {
                Ok(None)
            }
        }

        async fn attr_in(
            &self,
            _selector: &str,
            index: usize,
            child: &str,
            attr: &str,
            _timeout: Duration,
        ) -> SurfaceResult<Vec<String>> {
            self.guard()?;
            let item = self.item(index)?;
            if child == self.selectors.item_image && attr == "src" {
                Ok(item.images)
            } else {
                Ok(Vec::new())
            }
        }

        async fn click_in(
            &self,
            _selector: &str,
            index: usize,
            _child: &str,
            _timeout: Duration,
        ) -> SurfaceResult<()> {
            self.guard()?;
            if self.close_on_item == Some(index) {
                self.closed.store(true, Ordering::SeqCst);
                return Err(SurfaceError::SessionClosed);
            }
            let item = self.item(index)?;
            if item.fail_click {
                return Err(SurfaceError::Surface("click intercepted".to_string()));
            }
            self.state.lock().unwrap().detail = Some(index);
            Ok(())
        }

        async fn text_first(
            &self,
            selector: &str,
            _timeout: Duration,
        ) -> SurfaceResult<Option<String>> {
            self.guard()?;
            let detail = self.state.lock().unwrap().detail;
            let Some(index) = detail else {
                return Ok(None);
            };
            let item = self.item(index)?;
            if selector == self.selectors.detail_address {
                Ok(Some(item.address))
            } else if selector == self.selectors.detail_description {
                Ok(Some(item.description))
            } else {
                Ok(None)
            }
        }

        async fn attr_first(
            &self,
            selector: &str,
            attr: &str,
            _timeout: Duration,
        ) -> SurfaceResult<Option<String>> {
            self.guard()?;
            if selector == self.selectors.next_page && attr == "aria-disabled" {
                Ok(Some("false".to_string()))
            } else {
                Ok(None)
            }
        }

        async fn click_first(&self, selector: &str, _timeout: Duration) -> SurfaceResult<()> {
            self.guard()?;
            let mut state = self.state.lock().unwrap();
            if selector == self.selectors.detail_close || selector == self.selectors.detail_back {
                state.detail = None;
                Ok(())
            } else if selector == self.selectors.next_page {
                state.page += 1;
                Ok(())
            } else {
                Err(SurfaceError::Missing(selector.to_string()))
            }
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }
}
