use crate::driver::traits::PageEvent;
use crate::recorder::state::SessionState;
use crate::recorder::types::ActionKind;
use tokio::sync::{broadcast, mpsc, watch};

/// Inbound side of a session: page events plus the external stop signal
pub struct Inbox {
    events: mpsc::UnboundedReceiver<PageEvent>,
    stop: watch::Receiver<bool>,
    closed: bool,
}

/// What the coordinator woke up for
#[derive(Debug)]
pub enum Incoming {
    Event(PageEvent),
    Stop,
}

impl Inbox {
    pub fn new(events: mpsc::UnboundedReceiver<PageEvent>, stop: watch::Receiver<bool>) -> Self {
        Self {
            events,
            stop,
            closed: false,
        }
    }

    /// Wait for the next page event or a stop request. Stop wins ties.
    ///
    /// A closed page channel is reported as a crash, once.
    pub async fn next(&mut self) -> Incoming {
        if *self.stop.borrow() {
            return Incoming::Stop;
        }
        tokio::select! {
            biased;
            _ = wait_for_stop(&mut self.stop) => Incoming::Stop,
            event = self.events.recv(), if !self.closed => match event {
                Some(event) => Incoming::Event(event),
                None => {
                    self.closed = true;
                    Incoming::Event(PageEvent::Crashed {
                        reason: "page event channel closed".to_string(),
                    })
                }
            },
        }
    }

    /// Page events already delivered but not yet read
    pub fn drain_pending(&mut self) -> Vec<PageEvent> {
        let mut pending = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            pending.push(event);
        }
        pending
    }
}

async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            return;
        }
        if stop.changed().await.is_err() {
            // Handle dropped without stopping: treat as stop
            return;
        }
    }
}

/// Session progress events for real-time updates
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        state: SessionState,
    },
    ActionStarted {
        kind: ActionKind,
        selector: String,
    },
    ActionCommitted {
        index: usize,
        kind: ActionKind,
        selector: String,
        change_count: usize,
    },
    NavigationRecovered {
        url: String,
        warning: Option<String>,
    },
    Warning {
        message: String,
    },
    SessionFinished {
        action_count: usize,
    },
}

/// Event emitter for broadcasting session events
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<SessionEvent>) {
        let (sender, receiver) = broadcast::channel(100);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }
}

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration as StdDuration;

/// Console event listener for printing live recording progress
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<SessionEvent>) {
        use colored::Colorize;
        use std::io::IsTerminal;

        let spinner = if std::io::stdout().is_terminal() {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden())
        };
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .template("  {spinner} {msg}")
        {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(StdDuration::from_millis(100));
        spinner.set_message("waiting for interaction...".dimmed().to_string());

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                SessionEvent::StateChanged { state } => {
                    if state == SessionState::Armed {
                        spinner.set_message("waiting for interaction...".dimmed().to_string());
                    }
                }

                SessionEvent::ActionStarted { kind, selector } => {
                    spinner.set_message(format!("{} {} settling...", kind, selector.cyan()));
                }

                SessionEvent::ActionCommitted {
                    index,
                    kind,
                    selector,
                    change_count,
                } => {
                    let changes = if change_count == 0 {
                        "no observable changes".yellow().to_string()
                    } else {
                        format!("{} change(s)", change_count).green().to_string()
                    };
                    spinner.println(format!(
                        "  {} [{}] {} {} → {}",
                        "✓".green(),
                        index,
                        kind,
                        selector.cyan(),
                        changes
                    ));
                }

                SessionEvent::NavigationRecovered { url, warning } => {
                    spinner.println(format!(
                        "  {} navigation to {} recovered",
                        "↩".blue(),
                        url.dimmed()
                    ));
                    if let Some(w) = warning {
                        spinner.println(format!("  {} {}", "⚠️".yellow(), w.yellow()));
                    }
                }

                SessionEvent::Warning { message } => {
                    spinner.println(format!("  {} {}", "⚠️".yellow(), message.yellow()));
                }

                SessionEvent::SessionFinished { action_count } => {
                    spinner.finish_and_clear();
                    println!(
                        "\n{} Recording finished: {} action(s)",
                        "■".blue().bold(),
                        action_count
                    );
                    break;
                }
            }
        }
        spinner.finish_and_clear();
    }
}
