use serde::{Deserialize, Serialize};

/// Coordinator state
///
/// `Idle → Armed → Settling → {Committed | NavigationRecovering} → Armed → … → Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// No action in flight
    Idle,
    /// Observer reset, waiting for the next user action
    Armed,
    /// One action drained, waiting for its side effects to settle
    Settling,
    /// The in-flight action navigated away; bringing the page back
    NavigationRecovering,
    /// The in-flight action was appended to the session
    Committed,
}

impl SessionState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Armed)
                | (Armed, Settling)
                | (Armed, NavigationRecovering)
                | (Armed, Idle)
                | (Settling, Committed)
                | (Settling, NavigationRecovering)
                | (NavigationRecovering, Committed)
                | (NavigationRecovering, Armed)
                | (NavigationRecovering, Idle)
                | (Committed, Armed)
                | (Committed, Idle)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Armed => "armed",
            SessionState::Settling => "settling",
            SessionState::NavigationRecovering => "navigation-recovering",
            SessionState::Committed => "committed",
        };
        f.write_str(name)
    }
}
