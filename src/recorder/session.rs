//! Recording session coordinator
//!
//! Drives the per-action protocol: arm the observer, wait for a user action,
//! wait for its effects to settle (or for it to navigate away), commit it and
//! re-arm. Exactly one action is correlated at a time. The session owns the
//! browser page for its whole lifetime and runs on a single spawned task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::driver::traits::{BrowserPage, PageEvent};
use crate::error::{RecorderError, RecorderResult};
use crate::utils::config::RecorderConfig;

use super::action_capture::{ActionCapture, PendingAction};
use super::change_observer::{ChangeObserver, SettleEnd};
use super::events::{EventEmitter, Inbox, Incoming, SessionEvent};
use super::network::{diverges_from, document_url};
use super::state::SessionState;
use super::types::{ActionKind, ObservedChange, RecordedAction, WindowEnd};

/// Result of a finished session
#[derive(Debug, Clone)]
pub struct Recording {
    pub session_id: Uuid,
    pub target_url: String,
    pub actions: Vec<RecordedAction>,
    /// Set when the browser died before the session was stopped
    pub interrupted: Option<String>,
}

/// Cloneable, synchronous stop trigger (usable from a signal handler)
#[derive(Clone)]
pub struct StopSignal(Arc<watch::Sender<bool>>);

impl StopSignal {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

/// Handle to a running recording session
pub struct SessionHandle {
    pub id: Uuid,
    stop: StopSignal,
    emitter: EventEmitter,
    task: JoinHandle<RecorderResult<Recording>>,
}

impl SessionHandle {
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.emitter.subscribe()
    }

    /// Wait for the session to end on its own (stop signal or browser death)
    pub async fn wait(self) -> RecorderResult<Recording> {
        self.task
            .await
            .map_err(|e| RecorderError::Session(e.to_string()))?
    }
}

/// Load `url` and start recording with default settings and the given windows
pub async fn start_recording<P>(
    page: P,
    url: &str,
    settle_timeout_ms: u64,
    hard_cap_ms: u64,
) -> RecorderResult<SessionHandle>
where
    P: BrowserPage + 'static,
{
    let config = RecorderConfig {
        settle_timeout_ms,
        hard_cap_ms,
        ..Default::default()
    };
    start_recording_with(page, url, &config, EventEmitter::default()).await
}

/// Load `url` and start recording
///
/// # Returns
/// `RecorderError::Load` if the initial page cannot be loaded or instrumented
pub async fn start_recording_with<P>(
    page: P,
    url: &str,
    config: &RecorderConfig,
    emitter: EventEmitter,
) -> RecorderResult<SessionHandle>
where
    P: BrowserPage + 'static,
{
    config.validate()?;

    let events = page
        .subscribe()
        .map_err(|e| RecorderError::Session(format!("{:#}", e)))?;

    let load_error = |e: anyhow::Error| RecorderError::Load {
        url: url.to_string(),
        reason: format!("{:#}", e),
    };
    let mut capture = ActionCapture::new();
    let anchor_url = match page.load(url).await {
        Ok(anchor) => match capture.start(&page).await {
            Ok(()) => anchor,
            Err(e) => return Err(abandon(&page, load_error(e)).await),
        },
        Err(e) => return Err(abandon(&page, load_error(e)).await),
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let id = Uuid::new_v4();
    info!("Session {} recording {}", id, anchor_url);

    let session = RecordingSession {
        id,
        target_url: url.to_string(),
        observer: ChangeObserver::new(config, &anchor_url),
        anchor_url,
        settle_timeout: config.settle_timeout(),
        hard_cap: config.hard_cap(),
        state: SessionState::Idle,
        actions: Vec::new(),
        page,
        capture,
        inbox: Inbox::new(events, stop_rx),
        backlog: VecDeque::new(),
        orphan: None,
        emitter: emitter.clone(),
    };

    Ok(SessionHandle {
        id,
        stop: StopSignal(Arc::new(stop_tx)),
        emitter,
        task: tokio::spawn(session.run()),
    })
}

/// Stop a session, flushing the action in flight, and return what was recorded
pub async fn stop_recording(handle: SessionHandle) -> RecorderResult<Recording> {
    handle.stop.stop();
    handle.wait().await
}

async fn abandon<P: BrowserPage>(page: &P, error: RecorderError) -> RecorderError {
    if let Err(e) = page.close().await {
        debug!("Failed to close page after load error: {:#}", e);
    }
    error
}

enum SessionEnd {
    Stopped,
    Crashed(String),
}

/// Navigation seen while no action was in flight. The action that caused it
/// is re-queued by the page after the document comes back.
struct OrphanNavigation {
    url: String,
    warning: Option<String>,
}

struct RecordingSession<P> {
    id: Uuid,
    target_url: String,
    anchor_url: String,
    settle_timeout: Duration,
    hard_cap: Duration,
    state: SessionState,
    actions: Vec<RecordedAction>,
    page: P,
    capture: ActionCapture,
    observer: ChangeObserver,
    inbox: Inbox,
    backlog: VecDeque<PendingAction>,
    orphan: Option<OrphanNavigation>,
    emitter: EventEmitter,
}

impl<P: BrowserPage> RecordingSession<P> {
    async fn run(mut self) -> RecorderResult<Recording> {
        let end = loop {
            self.enter_armed();
            let action = match self.next_action().await {
                Ok(action) => action,
                Err(end) => break end,
            };
            if let Some(end) = self.correlate(action).await {
                break end;
            }
        };
        self.finish(end).await
    }

    fn set_state(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!("Unexpected session transition {} -> {}", self.state, next);
        }
        debug!("Session {}: {} -> {}", self.id, self.state, next);
        self.state = next;
        self.emitter.emit(SessionEvent::StateChanged { state: next });
    }

    fn enter_armed(&mut self) {
        if self.state != SessionState::Armed {
            self.observer.arm();
            self.set_state(SessionState::Armed);
        }
    }

    /// Wait in `Armed` for the next user action
    async fn next_action(&mut self) -> Result<PendingAction, SessionEnd> {
        loop {
            if self.backlog.is_empty() {
                self.backlog.extend(self.capture.drain());
            }
            if let Some(action) = self.backlog.pop_front() {
                return Ok(action);
            }

            let event = match self.inbox.next().await {
                Incoming::Stop => {
                    self.flush_on_stop(None).await;
                    return Err(SessionEnd::Stopped);
                }
                Incoming::Event(event) => event,
            };
            match event {
                PageEvent::UserAction { action } => self.capture.push(action),
                PageEvent::Navigated { url } => {
                    if diverges_from(&url, &self.anchor_url) {
                        let warning = self.recover(&url).await;
                        self.set_state(SessionState::Armed);
                        self.orphan = Some(OrphanNavigation { url, warning });
                    }
                }
                PageEvent::Crashed { reason } => return Err(SessionEnd::Crashed(reason)),
                // effects that no action caused
                other => debug!("Ignoring {:?} while armed", other),
            }
        }
    }

    /// Settle one action and commit it
    async fn correlate(&mut self, mut action: PendingAction) -> Option<SessionEnd> {
        if let Some(orphan) = self.orphan.take() {
            if action.restored {
                self.set_state(SessionState::Settling);
                let mut record = to_record(
                    &action,
                    vec![ObservedChange::Navigation { url: orphan.url }],
                    WindowEnd::Navigated,
                );
                record.warnings.extend(orphan.warning);
                self.commit(record);
                return None;
            }
            self.warn(format!(
                "Navigation to {} could not be attributed to an action",
                orphan.url
            ));
        }

        self.begin(&action);

        if !self.backlog.is_empty() {
            self.close_window(action, WindowEnd::Preempted).await;
            return None;
        }

        loop {
            let end = self
                .observer
                .await_settlement(&mut self.inbox, self.settle_timeout, self.hard_cap)
                .await;

            match end {
                SettleEnd::Quiet => {
                    self.close_window(action, WindowEnd::Settled).await;
                    return None;
                }
                SettleEnd::HardCap => {
                    self.close_window(action, WindowEnd::HardCapped).await;
                    return None;
                }
                SettleEnd::Stopped => {
                    self.flush_on_stop(Some(action)).await;
                    return Some(SessionEnd::Stopped);
                }
                SettleEnd::Event(PageEvent::UserAction { action: raw }) => {
                    if action.absorbs(&raw) {
                        action.absorb(raw);
                        self.observer.note_activity();
                    } else {
                        self.capture.push(raw);
                        self.close_window(action, WindowEnd::Preempted).await;
                        return None;
                    }
                }
                SettleEnd::Event(PageEvent::Navigated { url }) => {
                    if !diverges_from(&url, &self.anchor_url) {
                        debug!("Same-document navigation to {}", url);
                        continue;
                    }
                    let warning = self.recover(&url).await;
                    let mut record = to_record(
                        &action,
                        vec![ObservedChange::Navigation { url }],
                        WindowEnd::Navigated,
                    );
                    record.warnings.extend(warning);
                    self.commit(record);
                    return None;
                }
                SettleEnd::Event(PageEvent::Crashed { reason }) => {
                    let observation = self.observer.collect_offline();
                    let mut record = to_record(&action, observation.changes, WindowEnd::Crashed);
                    record.omitted_changes = observation.omitted;
                    record
                        .warnings
                        .push(format!("Browser crashed before the page settled: {}", reason));
                    self.commit(record);
                    return Some(SessionEnd::Crashed(reason));
                }
                SettleEnd::Event(other) => debug!("Unexpected event while settling: {:?}", other),
            }
        }
    }

    fn begin(&mut self, action: &PendingAction) {
        let selector = action.selector();
        info!("Recording {} {}", action.kind, selector.short_repr());
        self.set_state(SessionState::Settling);
        self.emitter.emit(SessionEvent::ActionStarted {
            kind: action.kind,
            selector: selector.selector,
        });
    }

    /// Correlate, without waiting, whatever the page delivered before the
    /// stop was seen. `current` is the action whose window is still open.
    async fn flush_on_stop(&mut self, mut current: Option<PendingAction>) {
        for event in self.inbox.drain_pending() {
            match event {
                PageEvent::UserAction { action: raw } => {
                    if let Some(action) = current.as_mut() {
                        if action.absorbs(&raw) {
                            action.absorb(raw);
                            continue;
                        }
                    }
                    if let Some(action) = current.take() {
                        self.close_window(action, WindowEnd::Preempted).await;
                    }
                    self.enter_armed();
                    let action = PendingAction::from(raw);
                    self.begin(&action);
                    current = Some(action);
                }
                other if current.is_some() => {
                    if let Some(unowned) = self.observer.observe(other) {
                        debug!("Ignoring {:?} after stop", unowned);
                    }
                }
                other => debug!("Ignoring {:?} after stop", other),
            }
        }
        if let Some(action) = current {
            self.close_window(action, WindowEnd::Stopped).await;
        }
    }

    /// Collect the window's changes and commit the action.
    ///
    /// Preempted windows are collected without querying the page: the next
    /// action may already have changed computed styles.
    async fn close_window(&mut self, action: PendingAction, end: WindowEnd) {
        let observation = match end {
            WindowEnd::Settled | WindowEnd::HardCapped | WindowEnd::Stopped => {
                self.observer.collect(&self.page).await
            }
            _ => self.observer.collect_offline(),
        };
        let mut record = to_record(&action, observation.changes, end);
        record.omitted_changes = observation.omitted;
        self.commit(record);
    }

    fn commit(&mut self, record: RecordedAction) {
        self.set_state(SessionState::Committed);
        let index = self.actions.len() + 1;
        info!(
            "Action {} committed: {} {} ({} change(s), {:?})",
            index,
            record.action_type,
            record.selector,
            record.changes.len(),
            record.window_end
        );
        self.emitter.emit(SessionEvent::ActionCommitted {
            index,
            kind: record.action_type,
            selector: record.selector.clone(),
            change_count: record.changes.len(),
        });
        self.actions.push(record);
    }

    /// Bring the page back to the anchor URL and re-instrument it.
    ///
    /// # Returns
    /// A warning if the page could not be recovered
    async fn recover(&mut self, url: &str) -> Option<String> {
        self.set_state(SessionState::NavigationRecovering);
        info!("Navigated to {}, returning to {}", url, self.anchor_url);

        let hard_cap = self.hard_cap;
        let warning = match tokio::time::timeout(hard_cap, self.return_to_anchor()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(RecorderError::NavigationRecovery(format!("{:#}", e)).to_string()),
            Err(_) => Some(
                RecorderError::NavigationRecovery(format!(
                    "timed out after {}ms",
                    hard_cap.as_millis()
                ))
                .to_string(),
            ),
        };
        if let Some(ref w) = warning {
            warn!("{}", w);
        }

        self.observer.arm();
        self.emitter.emit(SessionEvent::NavigationRecovered {
            url: url.to_string(),
            warning: warning.clone(),
        });
        warning
    }

    /// History back within half the hard cap, then a reload of the anchor if
    /// the page is anywhere else (including `about:blank`).
    async fn return_to_anchor(&mut self) -> Result<()> {
        let back_budget = self.hard_cap / 2;
        match tokio::time::timeout(back_budget, self.page.navigate_back()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Navigate back failed: {:#}", e),
            Err(_) => debug!(
                "Navigate back did not finish within {}ms",
                back_budget.as_millis()
            ),
        }
        let current = self.page.current_url().await.unwrap_or_default();
        if document_url(&current) != document_url(&self.anchor_url) {
            debug!("Still on {}, reloading {}", current, self.anchor_url);
            self.page
                .load(&self.anchor_url)
                .await
                .context("Failed to reload the recorded page")?;
        }
        self.capture.start(&self.page).await
    }

    fn warn(&self, message: String) {
        warn!("{}", message);
        self.emitter.emit(SessionEvent::Warning { message });
    }

    async fn finish(mut self, end: SessionEnd) -> RecorderResult<Recording> {
        self.set_state(SessionState::Idle);
        if let Some(orphan) = self.orphan.take() {
            self.warn(format!(
                "Navigation to {} could not be attributed to an action",
                orphan.url
            ));
        }
        if let Err(e) = self.page.close().await {
            warn!("Failed to close page: {:#}", e);
        }

        info!(
            "Session {} finished with {} action(s)",
            self.id,
            self.actions.len()
        );
        self.emitter.emit(SessionEvent::SessionFinished {
            action_count: self.actions.len(),
        });

        let interrupted = match end {
            SessionEnd::Stopped => None,
            SessionEnd::Crashed(reason) if self.actions.is_empty() => {
                return Err(RecorderError::BrowserCrash(reason));
            }
            SessionEnd::Crashed(reason) => Some(reason),
        };

        Ok(Recording {
            session_id: self.id,
            target_url: self.target_url,
            actions: self.actions,
            interrupted,
        })
    }
}

fn to_record(
    action: &PendingAction,
    changes: Vec<ObservedChange>,
    window_end: WindowEnd,
) -> RecordedAction {
    let selector = action.selector();
    let mut record = RecordedAction::new(action.kind, &selector.selector, changes);
    record.is_fragile = selector.is_fragile;
    record.window_end = window_end;
    record.value = match action.kind {
        ActionKind::Click => None,
        ActionKind::Fill | ActionKind::Keypress => action.value.clone(),
    };
    record
}
