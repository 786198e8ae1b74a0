//! Scripted in-memory page for recorder tests

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::driver::traits::{BrowserPage, PageEvent};
use crate::recorder::types::{ActionKind, ElementDescriptor, RawAction, RawMutation};

pub struct FakePage {
    sender: mpsc::UnboundedSender<PageEvent>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<PageEvent>>>,
    history: Mutex<Vec<String>>,
    styles: Mutex<HashMap<(String, String), String>>,
    installs: AtomicUsize,
    loads: AtomicUsize,
    unreachable: AtomicBool,
    back_is_broken: AtomicBool,
    back_hangs: AtomicBool,
    reload_broken: AtomicBool,
    closed: AtomicBool,
}

impl FakePage {
    pub fn new(url: &str) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            history: Mutex::new(vec![url.to_string()]),
            styles: Mutex::new(HashMap::new()),
            installs: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            unreachable: AtomicBool::new(false),
            back_is_broken: AtomicBool::new(false),
            back_hangs: AtomicBool::new(false),
            reload_broken: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Every `load` fails
    pub fn unreachable(self) -> Self {
        self.unreachable.store(true, Ordering::SeqCst);
        self
    }

    /// `navigate_back` and every load after the first fail
    pub fn with_broken_recovery(self) -> Self {
        self.back_is_broken.store(true, Ordering::SeqCst);
        self.reload_broken.store(true, Ordering::SeqCst);
        self
    }

    /// `navigate_back` never completes
    pub fn with_hanging_back(self) -> Self {
        self.back_hangs.store(true, Ordering::SeqCst);
        self
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<PageEvent> {
        self.sender.clone()
    }

    pub fn set_style(&self, selector: &str, property: &str, value: &str) {
        self.styles
            .lock()
            .unwrap()
            .insert((selector.to_string(), property.to_string()), value.to_string());
    }

    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> String {
        self.history.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Replace the current history entry, like `location.replace`
    pub fn replace_with(&self, url: &str) -> PageEvent {
        if let Some(entry) = self.history.lock().unwrap().last_mut() {
            *entry = url.to_string();
        }
        PageEvent::Navigated {
            url: url.to_string(),
        }
    }

    /// Simulate the document being replaced by `url`
    pub fn navigate_to(&self, url: &str) -> PageEvent {
        self.history.lock().unwrap().push(url.to_string());
        PageEvent::Navigated {
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn load(&self, url: &str) -> Result<String> {
        let reload_fails =
            self.reload_broken.load(Ordering::SeqCst) && self.loads.load(Ordering::SeqCst) > 0;
        if self.unreachable.load(Ordering::SeqCst) || reload_fails {
            anyhow::bail!("net::ERR_CONNECTION_REFUSED at {}", url);
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.history.lock().unwrap().push(url.to_string());
        Ok(url.to_string())
    }

    async fn install_listeners(&self) -> Result<()> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<PageEvent>> {
        self.receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("already subscribed"))
    }

    async fn computed_style(&self, selector: &str, property: &str) -> Result<Option<String>> {
        Ok(self
            .styles
            .lock()
            .unwrap()
            .get(&(selector.to_string(), property.to_string()))
            .cloned())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.url())
    }

    async fn navigate_back(&self) -> Result<()> {
        if self.back_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.back_is_broken.load(Ordering::SeqCst) {
            anyhow::bail!("no history entry to go back to");
        }
        let url = {
            let mut history = self.history.lock().unwrap();
            if history.len() > 1 {
                history.pop();
            }
            history.last().cloned().unwrap_or_default()
        };
        let _ = self.sender.send(PageEvent::Navigated { url });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn click(id: &str) -> PageEvent {
    PageEvent::UserAction {
        action: RawAction {
            kind: ActionKind::Click,
            element: ElementDescriptor::new("button").with_id(id),
            key: id.to_string(),
            value: None,
            input_like: false,
            restored: false,
        },
    }
}

pub fn fill(id: &str, value: &str) -> PageEvent {
    PageEvent::UserAction {
        action: RawAction {
            kind: ActionKind::Fill,
            element: ElementDescriptor::new("input").with_id(id),
            key: id.to_string(),
            value: Some(value.to_string()),
            input_like: true,
            restored: false,
        },
    }
}

pub fn added(id: &str) -> PageEvent {
    PageEvent::DomMutation {
        mutation: RawMutation::ChildAdded {
            element: ElementDescriptor::new("div").with_id(id),
        },
    }
}

pub fn removed(id: &str) -> PageEvent {
    PageEvent::DomMutation {
        mutation: RawMutation::ChildRemoved {
            element: ElementDescriptor::new("div").with_id(id),
        },
    }
}
