use crate::recorder::types::{RawAction, RawMutation};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

/// Something that happened on the recorded page.
///
/// User actions, DOM mutations and fetch/XHR traffic are produced by one
/// in-page queue, so they arrive in the page's own event-loop order.
/// Navigation and crashes are reported by the browser protocol.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PageEvent {
    UserAction {
        action: RawAction,
    },
    DomMutation {
        mutation: RawMutation,
    },
    RequestStarted {
        id: u64,
        method: String,
        url: String,
    },
    RequestFinished {
        id: u64,
    },
    /// The top-level document URL changed
    #[serde(skip)]
    Navigated { url: String },
    /// The page or browser process died
    #[serde(skip)]
    Crashed { reason: String },
}

/// Browser page capability set consumed by the recorder
///
/// This trait abstracts the browser-automation collaborator. A recording
/// session owns exactly one implementation for its whole lifetime.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate to a URL and wait for the load event
    ///
    /// # Returns
    /// The URL the page ended up on (after redirects)
    async fn load(&self, url: &str) -> Result<String>;

    /// Inject action, mutation and network listeners into the current
    /// document and every document loaded after it. Safe to call repeatedly.
    async fn install_listeners(&self) -> Result<()>;

    /// Take the page event stream. Can only be called once.
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<PageEvent>>;

    /// Computed value of a CSS property for the first element matching `selector`
    ///
    /// # Returns
    /// None if no element matches
    async fn computed_style(&self, selector: &str, property: &str) -> Result<Option<String>>;

    /// Current top-level URL
    async fn current_url(&self) -> Result<String>;

    /// Go back one history entry and wait for the document to load
    async fn navigate_back(&self) -> Result<()>;

    /// Release the page and its browser
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<P: BrowserPage + ?Sized> BrowserPage for std::sync::Arc<P> {
    async fn load(&self, url: &str) -> Result<String> {
        (**self).load(url).await
    }

    async fn install_listeners(&self) -> Result<()> {
        (**self).install_listeners().await
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<PageEvent>> {
        (**self).subscribe()
    }

    async fn computed_style(&self, selector: &str, property: &str) -> Result<Option<String>> {
        (**self).computed_style(selector, property).await
    }

    async fn current_url(&self) -> Result<String> {
        (**self).current_url().await
    }

    async fn navigate_back(&self) -> Result<()> {
        (**self).navigate_back().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
