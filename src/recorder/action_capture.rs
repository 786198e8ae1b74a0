//! Action capture for recording sessions
//!
//! The in-page listeners report every click, input and special key press.
//! This module buffers them as pending actions until the coordinator drains
//! them, folding keystroke-level input events into one logical fill.

use anyhow::{Context, Result};
use log::debug;

use crate::driver::traits::BrowserPage;

use super::selector_ranker::{self, SelectorResult};
use super::types::{ActionKind, ElementDescriptor, RawAction};

/// A user action waiting to be correlated with its effects
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub kind: ActionKind,
    pub element: ElementDescriptor,
    pub key: String,
    pub value: Option<String>,
    pub input_like: bool,
    pub restored: bool,
}

impl PendingAction {
    pub fn selector(&self) -> SelectorResult {
        selector_ranker::rank(&self.element)
    }

    /// Whether `raw` is more typing into the element this action targets.
    ///
    /// A click on an input-like element counts: it is only the focus step of
    /// the fill that follows.
    pub fn absorbs(&self, raw: &RawAction) -> bool {
        raw.kind == ActionKind::Fill
            && raw.key == self.key
            && (self.kind == ActionKind::Fill || (self.kind == ActionKind::Click && self.input_like))
    }

    /// Merge a later fill on the same element into this action (latest value wins)
    pub fn absorb(&mut self, raw: RawAction) {
        self.kind = ActionKind::Fill;
        self.value = raw.value;
        self.element = raw.element;
    }
}

impl From<RawAction> for PendingAction {
    fn from(raw: RawAction) -> Self {
        Self {
            kind: raw.kind,
            element: raw.element,
            key: raw.key,
            value: raw.value,
            input_like: raw.input_like,
            restored: raw.restored,
        }
    }
}

/// Buffer of user actions observed since the last drain
#[derive(Debug, Default)]
pub struct ActionCapture {
    buffer: Vec<PendingAction>,
}

impl ActionCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start listening on the page. Also used to re-arm after the document
    /// was replaced; buffered actions are kept.
    pub async fn start<P: BrowserPage + ?Sized>(&mut self, page: &P) -> Result<()> {
        page.install_listeners()
            .await
            .context("Failed to install action listeners")?;
        debug!("Action capture listening ({} buffered)", self.buffer.len());
        Ok(())
    }

    /// Buffer an action reported by the page
    pub fn push(&mut self, raw: RawAction) {
        if let Some(last) = self.buffer.last_mut() {
            if last.absorbs(&raw) {
                debug!("Merged input into pending {} on {}", last.kind, last.key);
                last.absorb(raw);
                return;
            }
        }
        self.buffer.push(raw.into());
    }

    /// Return and clear everything buffered since the last drain
    pub fn drain(&mut self) -> Vec<PendingAction> {
        std::mem::take(&mut self.buffer)
    }
}
