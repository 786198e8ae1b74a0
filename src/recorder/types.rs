//! Data model shared by the recorder core, the browser driver and the
//! script synthesizer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of user interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Click,
    Fill,
    Keypress,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Fill => "fill",
            ActionKind::Keypress => "keypress",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the attributes selector ranking looks at.
///
/// Empty strings mean "attribute absent", which is how the in-page script
/// serializes missing attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub test_id: String,
    #[serde(default)]
    pub aria_label: String,
}

impl ElementDescriptor {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_test_id(mut self, test_id: &str) -> Self {
        self.test_id = test_id.to_string();
        self
    }

    pub fn with_aria_label(mut self, label: &str) -> Self {
        self.aria_label = label.to_string();
        self
    }

    pub fn with_classes(mut self, classes: &[&str]) -> Self {
        self.classes = classes.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// A user action as reported by the in-page listeners
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAction {
    pub kind: ActionKind,
    pub element: ElementDescriptor,
    /// Identity of the target element (id, data-testid, name or a structural fallback)
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub input_like: bool,
    /// Set when the action was persisted across a document unload and re-queued
    #[serde(default)]
    pub restored: bool,
}

/// Interesting CSS property values of one element, taken before a mutation
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleSnapshot {
    pub element: ElementDescriptor,
    /// Structural distance from the mutated element (0 = the element itself)
    pub depth: u8,
    pub before: BTreeMap<String, String>,
}

/// A DOM mutation as reported by the in-page MutationObserver
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RawMutation {
    ChildAdded {
        element: ElementDescriptor,
    },
    ChildRemoved {
        element: ElementDescriptor,
    },
    #[serde(rename_all = "camelCase")]
    Attribute {
        element: ElementDescriptor,
        attribute: String,
        visible_before: bool,
        visible_after: bool,
        #[serde(default)]
        styles: Vec<StyleSnapshot>,
    },
    Text {
        element: ElementDescriptor,
        text: String,
    },
}

/// Observable DOM effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DomChangeKind {
    Added,
    Removed,
    VisibilityChanged { visible: bool },
    TextChanged { text: String },
}

/// One side effect attributed to a recorded action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "camelCase")]
pub enum ObservedChange {
    Dom {
        kind: DomChangeKind,
        selector: String,
    },
    Css {
        selector: String,
        property: String,
        value: String,
    },
    #[serde(rename_all = "camelCase")]
    Network { method: String, url_pattern: String },
    /// The action replaced the document; the page was navigated back
    Navigation { url: String },
}

impl ObservedChange {
    pub fn added(selector: &str) -> Self {
        ObservedChange::Dom {
            kind: DomChangeKind::Added,
            selector: selector.to_string(),
        }
    }

    pub fn removed(selector: &str) -> Self {
        ObservedChange::Dom {
            kind: DomChangeKind::Removed,
            selector: selector.to_string(),
        }
    }

    pub fn text_changed(selector: &str, text: &str) -> Self {
        ObservedChange::Dom {
            kind: DomChangeKind::TextChanged {
                text: text.to_string(),
            },
            selector: selector.to_string(),
        }
    }

    pub fn visibility_changed(selector: &str, visible: bool) -> Self {
        ObservedChange::Dom {
            kind: DomChangeKind::VisibilityChanged { visible },
            selector: selector.to_string(),
        }
    }

    pub fn css(selector: &str, property: &str, value: &str) -> Self {
        ObservedChange::Css {
            selector: selector.to_string(),
            property: property.to_string(),
            value: value.to_string(),
        }
    }

    pub fn network(method: &str, url_pattern: &str) -> Self {
        ObservedChange::Network {
            method: method.to_string(),
            url_pattern: url_pattern.to_string(),
        }
    }

    pub fn is_navigation(&self) -> bool {
        matches!(self, ObservedChange::Navigation { .. })
    }
}

/// How the correlation window of an action was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WindowEnd {
    /// Quiet period elapsed with no outstanding request
    Settled,
    /// Hard cap reached before the page went quiet
    HardCapped,
    /// The next user action arrived before the page went quiet
    Preempted,
    /// Session stop flushed the window
    Stopped,
    /// The action navigated away and the page was brought back
    Navigated,
    /// The browser died while the window was open
    Crashed,
}

impl WindowEnd {
    /// Whether the recorded changes may not reflect the final page state
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            WindowEnd::HardCapped | WindowEnd::Stopped | WindowEnd::Crashed
        )
    }
}

/// A user action together with the side effects it caused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedAction {
    pub action_type: ActionKind,
    pub selector: String,
    pub is_fragile: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub changes: Vec<ObservedChange>,
    pub window_end: WindowEnd,
    /// DOM/CSS changes dropped by the per-action cap
    #[serde(default)]
    pub omitted_changes: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RecordedAction {
    pub fn new(action_type: ActionKind, selector: &str, changes: Vec<ObservedChange>) -> Self {
        Self {
            action_type,
            selector: selector.to_string(),
            is_fragile: false,
            value: None,
            changes,
            window_end: WindowEnd::Settled,
            omitted_changes: 0,
            warnings: Vec::new(),
        }
    }

    pub fn navigated(&self) -> bool {
        self.changes.iter().any(ObservedChange::is_navigation)
    }
}
