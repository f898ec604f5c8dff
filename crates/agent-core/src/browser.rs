//! Browser Contract (component A): the abstract page-observation and
//! action surface the Action Loop drives, plus the ref lifecycle invariant
//! that makes cross-page-transition element identity safe.
//!
//! Concrete back-ends (Playwright, WebExtension, CDP) are external
//! collaborators and out of scope here; [`MockBrowser`] is the only
//! implementation this crate ships, used to exercise every branch of the
//! control loop in tests without a real driver.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use webloop_core_types::ElementRef;

/// One browser-side action the Action Loop may dispatch after a tool call
/// is validated by the Tool Catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserAction {
    Click,
    Hover,
    Fill,
    Focus,
    Check,
    Uncheck,
    Select,
    Enter,
    Wait,
    Goto,
    Back,
    Forward,
    Done,
    /// Browser-side no-op the higher layer (Action Loop / Tool Catalog)
    /// handles entirely on its own.
    FillAndEnter,
    Extract,
    Abort,
}

impl BrowserAction {
    /// Actions after which page content may have changed and a fresh
    /// snapshot must be fetched before any subsequent ref is trusted.
    pub fn may_transition_page(self) -> bool {
        matches!(
            self,
            BrowserAction::Click
                | BrowserAction::Select
                | BrowserAction::Enter
                | BrowserAction::FillAndEnter
                | BrowserAction::Goto
                | BrowserAction::Back
                | BrowserAction::Forward
        )
    }

    /// Actions that never need a fresh page snapshot before the next
    /// iteration (they don't target an on-page ref at all).
    pub fn skips_next_snapshot(self) -> bool {
        matches!(self, BrowserAction::Extract)
    }
}

/// Why a ref passed to `perform_action` failed to resolve. The browser must
/// distinguish these so the Action Loop can build an honest feedback
/// message instead of a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefMissReason {
    /// The ref was present in the previous snapshot, but an intervening
    /// page transition invalidated it.
    PageChanged,
    /// The ref never existed in any snapshot the browser produced —
    /// the model hallucinated it.
    Hallucinated,
}

#[derive(Debug, Error, Clone)]
pub enum BrowserError {
    #[error("element with ref {ref_} not found. valid refs range from {lowest} to {highest}. {reason}")]
    RefMiss {
        ref_: ElementRef,
        lowest: String,
        highest: String,
        reason: String,
    },
    #[error("action {action:?} is not valid for this element type")]
    ActionRefusedForElementType { action: BrowserAction },
    #[error("navigation failed: {0}")]
    NavigationFailed(String),
    #[error("browser disconnected or driver crashed: {0}")]
    Fatal(String),
}

impl BrowserError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BrowserError::Fatal(_))
    }

    pub fn ref_miss(ref_: ElementRef, snapshot: &Snapshot, reason: RefMissReason) -> Self {
        let (lowest, highest) = snapshot.ref_bounds();
        let reason_text = match reason {
            RefMissReason::PageChanged => {
                "This ref was present in the previous snapshot but the page changed."
            }
            RefMissReason::Hallucinated => "This ref was not present in the previous snapshot.",
        };
        Self::RefMiss {
            ref_,
            lowest,
            highest,
            reason: reason_text.to_string(),
        }
    }
}

/// A rendered textual tree of the page's accessible elements plus the
/// page's title and url, and the set of refs that are valid to pass back
/// to `perform_action` until the next snapshot is taken.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tree: String,
    pub title: String,
    pub url: String,
    pub refs: BTreeSet<ElementRef>,
}

impl Snapshot {
    pub fn contains(&self, ref_: &ElementRef) -> bool {
        self.refs.contains(ref_)
    }

    fn ref_bounds(&self) -> (String, String) {
        let lowest = self
            .refs
            .iter()
            .min()
            .cloned()
            .map(|r| r.0)
            .unwrap_or_else(|| "<none>".to_string());
        let highest = self
            .refs
            .iter()
            .max()
            .cloned()
            .map(|r| r.0)
            .unwrap_or_else(|| "<none>".to_string());
        (lowest, highest)
    }
}

/// JPEG screenshot bytes, captured on demand in vision mode.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub jpeg_bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// The capability set the Action Loop consumes. All operations are
/// asynchronous and may fail; see module docs for the ref lifecycle
/// invariant every implementation must uphold.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn start(&self) -> Result<(), BrowserError>;
    async fn shutdown(&self) -> Result<(), BrowserError>;
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;
    async fn go_back(&self) -> Result<(), BrowserError>;
    async fn go_forward(&self) -> Result<(), BrowserError>;
    async fn get_url(&self) -> Result<String, BrowserError>;
    async fn get_title(&self) -> Result<String, BrowserError>;
    async fn get_tree_with_refs(&self) -> Result<Snapshot, BrowserError>;
    async fn get_screenshot(&self, with_marks: bool) -> Result<Screenshot, BrowserError>;
    async fn perform_action(
        &self,
        ref_: Option<&ElementRef>,
        action: BrowserAction,
        value: Option<&str>,
    ) -> Result<(), BrowserError>;
    async fn wait_for_load_state(
        &self,
        state: LoadState,
        timeout_ms: Option<u64>,
    ) -> Result<(), BrowserError>;
}

/// One page in the mock browser's fixed page graph: a handful of clickable
/// elements, one of which navigates to another page by index.
#[derive(Debug, Clone)]
pub struct MockPage {
    pub url: String,
    pub title: String,
    /// `(ref index, label, optional target page index for navigation)`
    pub elements: Vec<(u32, &'static str, Option<usize>)>,
}

impl MockPage {
    fn render(&self) -> String {
        self.elements
            .iter()
            .map(|(idx, label, _)| format!("[s1e{idx}] {label}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn refs(&self) -> BTreeSet<ElementRef> {
        self.elements
            .iter()
            .map(|(idx, _, _)| ElementRef::new(*idx))
            .collect()
    }
}

struct MockBrowserState {
    current_page: usize,
    /// Refs that were valid in the snapshot fetched immediately prior to
    /// the current one; used to distinguish "page changed" from
    /// "hallucinated" on a ref miss.
    previous_refs: BTreeSet<ElementRef>,
    started: bool,
}

/// Deterministic in-memory browser over a small fixed page graph. Used by
/// every control-loop test; not gated behind `#[cfg(test)]` so downstream
/// integration tests and doc examples can also depend on it.
pub struct MockBrowser {
    pages: Vec<MockPage>,
    state: Mutex<MockBrowserState>,
}

impl MockBrowser {
    pub fn new(pages: Vec<MockPage>) -> Self {
        Self {
            pages,
            state: Mutex::new(MockBrowserState {
                current_page: 0,
                previous_refs: BTreeSet::new(),
                started: false,
            }),
        }
    }

    /// A single-page browser with `count` generic clickable elements,
    /// useful for repetition/hallucination tests that don't care about
    /// navigation.
    pub fn single_page(url: &str, title: &str, element_count: u32) -> Self {
        let elements = (0..element_count)
            .map(|i| (i, "clickable", None))
            .collect();
        Self::new(vec![MockPage {
            url: url.to_string(),
            title: title.to_string(),
            elements,
        }])
    }

    fn current(&self) -> MockPage {
        let state = self.state.lock().unwrap();
        self.pages[state.current_page].clone()
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn start(&self) -> Result<(), BrowserError> {
        self.state.lock().unwrap().started = true;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BrowserError> {
        self.state.lock().unwrap().started = false;
        Ok(())
    }

    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        let mut state = self.state.lock().unwrap();
        match self.pages.iter().position(|p| p.url == url) {
            Some(idx) => {
                state.current_page = idx;
                Ok(())
            }
            None => Err(BrowserError::NavigationFailed(format!(
                "no such page: {url}"
            ))),
        }
    }

    async fn go_back(&self) -> Result<(), BrowserError> {
        let mut state = self.state.lock().unwrap();
        if state.current_page > 0 {
            state.current_page -= 1;
        }
        Ok(())
    }

    async fn go_forward(&self) -> Result<(), BrowserError> {
        let mut state = self.state.lock().unwrap();
        if state.current_page + 1 < self.pages.len() {
            state.current_page += 1;
        }
        Ok(())
    }

    async fn get_url(&self) -> Result<String, BrowserError> {
        Ok(self.current().url)
    }

    async fn get_title(&self) -> Result<String, BrowserError> {
        Ok(self.current().title)
    }

    async fn get_tree_with_refs(&self) -> Result<Snapshot, BrowserError> {
        let page = self.current();
        let refs = page.refs();
        let snapshot = Snapshot {
            tree: page.render(),
            title: page.title,
            url: page.url,
            refs: refs.clone(),
        };
        self.state.lock().unwrap().previous_refs = refs;
        Ok(snapshot)
    }

    async fn get_screenshot(&self, _with_marks: bool) -> Result<Screenshot, BrowserError> {
        Ok(Screenshot {
            jpeg_bytes: vec![0xFF, 0xD8, 0xFF],
        })
    }

    async fn perform_action(
        &self,
        ref_: Option<&ElementRef>,
        action: BrowserAction,
        _value: Option<&str>,
    ) -> Result<(), BrowserError> {
        if let Some(ref_) = ref_ {
            let page = self.current();
            let live_refs = page.refs();
            if !live_refs.contains(ref_) {
                let previous = self.state.lock().unwrap().previous_refs.clone();
                let snapshot = Snapshot {
                    tree: page.render(),
                    title: page.title.clone(),
                    url: page.url.clone(),
                    refs: live_refs,
                };
                let reason = if previous.contains(ref_) {
                    RefMissReason::PageChanged
                } else {
                    RefMissReason::Hallucinated
                };
                return Err(BrowserError::ref_miss(ref_.clone(), &snapshot, reason));
            }

            if action.may_transition_page() {
                if let Some(index) = ref_.index() {
                    if let Some((_, _, Some(target))) =
                        page.elements.iter().find(|(idx, _, _)| *idx == index)
                    {
                        let mut state = self.state.lock().unwrap();
                        state.current_page = *target;
                    }
                }
            }
        }
        Ok(())
    }

    async fn wait_for_load_state(
        &self,
        _state: LoadState,
        _timeout_ms: Option<u64>,
    ) -> Result<(), BrowserError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hallucinated_ref_is_distinguished_from_page_changed() {
        let browser = MockBrowser::single_page("https://example.com", "Example", 3);
        browser.start().await.unwrap();
        let snap = browser.get_tree_with_refs().await.unwrap();
        assert_eq!(snap.refs.len(), 3);

        let err = browser
            .perform_action(Some(&ElementRef::new(99)), BrowserAction::Click, None)
            .await
            .unwrap_err();
        match err {
            BrowserError::RefMiss { reason, .. } => {
                assert!(reason.contains("not present in the previous snapshot"));
            }
            other => panic!("expected RefMiss, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ref_valid_in_previous_snapshot_reports_page_changed() {
        let browser = MockBrowser::new(vec![
            MockPage {
                url: "https://a.test".into(),
                title: "A".into(),
                elements: vec![(0, "go", Some(1))],
            },
            MockPage {
                url: "https://b.test".into(),
                title: "B".into(),
                elements: vec![(5, "other", None)],
            },
        ]);
        browser.start().await.unwrap();
        browser.get_tree_with_refs().await.unwrap();
        browser
            .perform_action(Some(&ElementRef::new(0)), BrowserAction::Click, None)
            .await
            .unwrap();
        // Page transitioned; ref 0 no longer exists but was valid previously.
        let err = browser
            .perform_action(Some(&ElementRef::new(0)), BrowserAction::Click, None)
            .await
            .unwrap_err();
        match err {
            BrowserError::RefMiss { reason, .. } => {
                assert!(reason.contains("page changed"));
            }
            other => panic!("expected RefMiss, got {other:?}"),
        }
    }
}
