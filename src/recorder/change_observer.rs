//! Change observer
//!
//! Collects the DOM, CSS and network side effects of one user action and
//! decides when the page has settled. Raw material arrives as `PageEvent`s
//! from the in-page queue; settlement is reached when no DOM mutation has
//! happened for the quiet window and no tracked request is outstanding, or
//! when the hard cap measured from the start of the window expires.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use log::debug;
use tokio::time::{sleep_until, Instant};

use crate::driver::traits::{BrowserPage, PageEvent};
use crate::utils::config::RecorderConfig;

use super::events::{Inbox, Incoming};
use super::network::{normalize_pattern, RequestFilter};
use super::selector_ranker;
use super::types::{DomChangeKind, ElementDescriptor, ObservedChange, RawMutation, StyleSnapshot};

/// Tags whose mutations are rendering noise rather than observable state
pub const IGNORED_TAGS: &[&str] = &[
    "script", "style", "link", "meta", "noscript", "iframe", "time", "hr", "br", "svg", "path",
    "g", "circle", "rect", "line", "polygon", "polyline", "img", "source", "picture", "canvas",
    "slot",
];

/// Structural distance beyond which CSS is not tracked
const MAX_STYLE_DEPTH: u8 = 2;

/// Why `await_settlement` returned
#[derive(Debug)]
pub enum SettleEnd {
    /// Quiet window elapsed with no outstanding request
    Quiet,
    /// Hard cap expired first
    HardCap,
    /// External stop request
    Stopped,
    /// An event the observer does not own (user action, navigation, crash)
    Event(PageEvent),
}

/// Changes attributed to one action
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub changes: Vec<ObservedChange>,
    /// DOM/CSS changes dropped by the per-action cap
    pub omitted: usize,
}

#[derive(Debug)]
enum Entry {
    Change(ObservedChange),
    /// Re-check of a style target, resolved at collection time
    StyleProbe(usize),
}

#[derive(Debug)]
struct StyleTarget {
    selector: String,
    before: BTreeMap<String, String>,
}

pub struct ChangeObserver {
    anchor_url: String,
    filter: RequestFilter,
    only_stable_selectors: bool,
    max_changes: usize,
    max_style_targets: usize,

    entries: Vec<Entry>,
    style_targets: Vec<StyleTarget>,
    outstanding: HashSet<u64>,
    seen_requests: HashSet<String>,
    armed_at: Option<Instant>,
    last_activity: Option<Instant>,
}

impl ChangeObserver {
    pub fn new(config: &RecorderConfig, anchor_url: &str) -> Self {
        Self {
            anchor_url: anchor_url.to_string(),
            filter: RequestFilter::new(&config.ignored_url_patterns),
            only_stable_selectors: config.only_stable_selectors,
            max_changes: config.max_changes_per_action,
            max_style_targets: config.max_style_targets,
            entries: Vec::new(),
            style_targets: Vec::new(),
            outstanding: HashSet::new(),
            seen_requests: HashSet::new(),
            armed_at: None,
            last_activity: None,
        }
    }

    /// Reset all buffers. The window clock starts on the next `await_settlement`.
    pub fn arm(&mut self) {
        self.entries.clear();
        self.style_targets.clear();
        self.outstanding.clear();
        self.seen_requests.clear();
        self.armed_at = None;
        self.last_activity = None;
        debug!("Change observer armed");
    }

    /// Restart the quiet window without recording a change
    pub fn note_activity(&mut self) {
        self.last_activity = Some(Instant::now());
    }

    pub fn has_outstanding_requests(&self) -> bool {
        !self.outstanding.is_empty()
    }

    /// Wait until the page settles, the hard cap expires, or an event arrives
    /// that the caller has to handle.
    ///
    /// Re-entrant: calling it again after an `Event` return continues the same
    /// window with the same hard-cap deadline.
    pub async fn await_settlement(
        &mut self,
        inbox: &mut Inbox,
        window: Duration,
        hard_cap: Duration,
    ) -> SettleEnd {
        let armed_at = *self.armed_at.get_or_insert_with(Instant::now);
        let cap_deadline = armed_at + hard_cap;

        loop {
            let now = Instant::now();
            if now >= cap_deadline {
                debug!(
                    "Hard cap reached with {} request(s) outstanding",
                    self.outstanding.len()
                );
                return SettleEnd::HardCap;
            }

            let quiet_deadline = self.last_activity.unwrap_or(armed_at) + window;
            let waiting_on_network = self.has_outstanding_requests();
            if !waiting_on_network && now >= quiet_deadline {
                return SettleEnd::Quiet;
            }

            let wake_at = if waiting_on_network {
                cap_deadline
            } else {
                quiet_deadline.min(cap_deadline)
            };

            tokio::select! {
                biased;
                incoming = inbox.next() => match incoming {
                    Incoming::Stop => return SettleEnd::Stopped,
                    Incoming::Event(event) => {
                        if let Some(event) = self.observe(event) {
                            return SettleEnd::Event(event);
                        }
                    }
                },
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    /// Record a page event. Events the observer does not own are handed back.
    pub fn observe(&mut self, event: PageEvent) -> Option<PageEvent> {
        match event {
            PageEvent::DomMutation { mutation } => {
                self.ingest_mutation(mutation);
                None
            }
            PageEvent::RequestStarted { id, method, url } => {
                self.ingest_request(id, &method, &url);
                None
            }
            PageEvent::RequestFinished { id } => {
                if self.outstanding.remove(&id) {
                    debug!("Request {} finished", id);
                    self.note_activity();
                }
                None
            }
            other => Some(other),
        }
    }

    fn ingest_mutation(&mut self, mutation: RawMutation) {
        match mutation {
            RawMutation::ChildAdded { element } => {
                self.push_dom(&element, DomChangeKind::Added);
            }
            RawMutation::ChildRemoved { element } => {
                self.push_dom(&element, DomChangeKind::Removed);
            }
            RawMutation::Text { element, text } => {
                self.push_dom(&element, DomChangeKind::TextChanged { text });
            }
            RawMutation::Attribute {
                element,
                attribute,
                visible_before,
                visible_after,
                styles,
            } => {
                if is_ignored(&element) {
                    return;
                }
                debug!("Attribute '{}' changed on <{}>", attribute, element.tag);
                if visible_before != visible_after {
                    self.push_dom(
                        &element,
                        DomChangeKind::VisibilityChanged {
                            visible: visible_after,
                        },
                    );
                } else {
                    self.note_activity();
                }
                self.track_styles(styles);
            }
        }
    }

    fn push_dom(&mut self, element: &ElementDescriptor, kind: DomChangeKind) {
        if is_ignored(element) {
            return;
        }
        self.note_activity();

        let selector = selector_ranker::rank(element);
        if selector.is_fragile && self.only_stable_selectors {
            debug!("Dropping change on fragile selector {}", selector.selector);
            return;
        }
        self.entries.push(Entry::Change(ObservedChange::Dom {
            kind,
            selector: selector.selector,
        }));
    }

    /// Register the neighbourhood of a mutated element for a CSS re-check.
    ///
    /// Only stable selectors are tracked: a class or tag selector would be
    /// resolved against whichever element matches first at query time.
    fn track_styles(&mut self, styles: Vec<StyleSnapshot>) {
        for snapshot in styles {
            if snapshot.depth > MAX_STYLE_DEPTH || is_ignored(&snapshot.element) {
                continue;
            }
            let selector = selector_ranker::rank(&snapshot.element);
            if selector.is_fragile {
                continue;
            }

            match self
                .style_targets
                .iter_mut()
                .find(|t| t.selector == selector.selector)
            {
                Some(target) => {
                    // first snapshot of a property is the pre-action value
                    for (property, value) in snapshot.before {
                        target.before.entry(property).or_insert(value);
                    }
                }
                None => {
                    if self.style_targets.len() >= self.max_style_targets {
                        continue;
                    }
                    self.style_targets.push(StyleTarget {
                        selector: selector.selector,
                        before: snapshot.before,
                    });
                    self.entries
                        .push(Entry::StyleProbe(self.style_targets.len() - 1));
                }
            }
        }
    }

    fn ingest_request(&mut self, id: u64, method: &str, url: &str) {
        if !self.filter.accepts(url) {
            debug!("Ignoring request {} {}", method, url);
            return;
        }
        self.outstanding.insert(id);
        self.note_activity();

        let method = method.to_uppercase();
        let pattern = normalize_pattern(url, &self.anchor_url);
        if self.seen_requests.insert(format!("{}:{}", method, pattern)) {
            debug!("Tracking request {} {}", method, pattern);
            self.entries
                .push(Entry::Change(ObservedChange::network(&method, &pattern)));
        }
    }

    /// Resolve style probes against the settled page and return the window's changes.
    ///
    /// Style queries that fail are skipped.
    pub async fn collect<P: BrowserPage + ?Sized>(&mut self, page: &P) -> Observation {
        let mut resolved: HashMap<usize, Vec<ObservedChange>> = HashMap::new();
        for (index, target) in self.style_targets.iter().enumerate() {
            let mut changes = Vec::new();
            for (property, before) in &target.before {
                match page.computed_style(&target.selector, property).await {
                    Ok(Some(after)) if !after.is_empty() && after != *before => {
                        changes.push(ObservedChange::css(&target.selector, property, &after));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(
                            "Style query {} {} failed: {:#}",
                            target.selector, property, e
                        );
                    }
                }
            }
            resolved.insert(index, changes);
        }
        self.finish(resolved)
    }

    /// Return the window's changes without querying the page (CSS is dropped)
    pub fn collect_offline(&mut self) -> Observation {
        self.finish(HashMap::new())
    }

    fn finish(&mut self, mut resolved: HashMap<usize, Vec<ObservedChange>>) -> Observation {
        let entries = std::mem::take(&mut self.entries);
        let mut ordered = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                Entry::Change(change) => ordered.push(change),
                Entry::StyleProbe(index) => {
                    if let Some(changes) = resolved.remove(&index) {
                        ordered.extend(changes);
                    }
                }
            }
        }
        let (changes, omitted) = normalize(ordered, self.max_changes);
        Observation { changes, omitted }
    }
}

fn is_ignored(element: &ElementDescriptor) -> bool {
    let tag = element.tag.to_ascii_lowercase();
    IGNORED_TAGS.contains(&tag.as_str())
}

/// Fold, deduplicate and cap the changes of one window.
///
/// Presence (added/removed/visibility) and text changes on the same selector
/// keep only their final state, at the position of the first occurrence.
/// Text and CSS changes on an element that ends up hidden are dropped.
/// Other exact duplicates are removed. Network changes are not capped.
pub fn normalize(changes: Vec<ObservedChange>, max_changes: usize) -> (Vec<ObservedChange>, usize) {
    let mut folded: Vec<ObservedChange> = Vec::with_capacity(changes.len());
    let mut slots: HashMap<(String, bool), usize> = HashMap::new();

    for change in changes {
        if let ObservedChange::Dom { kind, selector } = &change {
            let is_text = matches!(kind, DomChangeKind::TextChanged { .. });
            match slots.get(&(selector.clone(), is_text)) {
                Some(&slot) => folded[slot] = change,
                None => {
                    slots.insert((selector.clone(), is_text), folded.len());
                    folded.push(change);
                }
            }
        } else if !folded.contains(&change) {
            folded.push(change);
        }
    }

    let hidden: HashSet<String> = folded
        .iter()
        .filter_map(|change| match change {
            ObservedChange::Dom {
                kind: DomChangeKind::Removed | DomChangeKind::VisibilityChanged { visible: false },
                selector,
            } => Some(selector.clone()),
            _ => None,
        })
        .collect();

    let mut kept = Vec::with_capacity(folded.len());
    let mut counted = 0;
    let mut omitted = 0;
    for change in folded {
        let on_hidden = match &change {
            ObservedChange::Dom {
                kind: DomChangeKind::TextChanged { .. },
                selector,
            }
            | ObservedChange::Css { selector, .. } => hidden.contains(selector),
            _ => false,
        };
        if on_hidden {
            continue;
        }

        let capped = matches!(change, ObservedChange::Dom { .. } | ObservedChange::Css { .. });
        if capped {
            if counted >= max_changes {
                omitted += 1;
                continue;
            }
            counted += 1;
        }
        kept.push(change);
    }

    (kept, omitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakePage;
    use tokio::sync::{mpsc, watch};

    const ANCHOR: &str = "http://localhost:3000/";

    fn observer() -> ChangeObserver {
        ChangeObserver::new(&RecorderConfig::default(), ANCHOR)
    }

    fn added(id: &str) -> PageEvent {
        PageEvent::DomMutation {
            mutation: RawMutation::ChildAdded {
                element: ElementDescriptor::new("div").with_id(id),
            },
        }
    }

    fn inbox() -> (mpsc::UnboundedSender<PageEvent>, watch::Sender<bool>, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        (tx, stop_tx, Inbox::new(rx, stop_rx))
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_last_mutation_plus_window() {
        let (tx, _stop, mut inbox) = inbox();
        let mut obs = observer();
        obs.arm();

        let start = Instant::now();
        tokio::spawn(async move {
            for (i, at) in [0u64, 30, 60, 90].into_iter().enumerate() {
                sleep_until(start + Duration::from_millis(at)).await;
                tx.send(added(&format!("row-{}", i))).unwrap();
            }
            // keep the channel open past settlement
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let end = obs
            .await_settlement(&mut inbox, Duration::from_millis(100), Duration::from_secs(5))
            .await;

        assert!(matches!(end, SettleEnd::Quiet));
        assert!(start.elapsed() >= Duration::from_millis(190));
        assert!(start.elapsed() < Duration::from_millis(250));
        assert_eq!(obs.collect_offline().changes.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_cap_bounds_endless_mutations() {
        let (tx, _stop, mut inbox) = inbox();
        let mut obs = observer();
        obs.arm();

        let start = Instant::now();
        tokio::spawn(async move {
            for i in 0.. {
                if tx.send(added(&format!("tick-{}", i % 3))).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        let end = obs
            .await_settlement(&mut inbox, Duration::from_millis(100), Duration::from_millis(400))
            .await;

        assert!(matches!(end, SettleEnd::HardCap));
        assert!(start.elapsed() >= Duration::from_millis(400));
        assert!(start.elapsed() < Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outstanding_request_blocks_settlement() {
        let (tx, _stop, mut inbox) = inbox();
        let mut obs = observer();
        obs.arm();

        tx.send(PageEvent::RequestStarted {
            id: 7,
            method: "get".to_string(),
            url: "http://localhost:3000/api/data?x=1".to_string(),
        })
        .unwrap();

        let start = Instant::now();
        let sender = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(800)).await;
            sender.send(PageEvent::RequestFinished { id: 7 }).unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let end = obs
            .await_settlement(&mut inbox, Duration::from_millis(100), Duration::from_secs(5))
            .await;

        assert!(matches!(end, SettleEnd::Quiet));
        assert!(start.elapsed() >= Duration::from_millis(900));
        assert_eq!(
            obs.collect_offline().changes,
            vec![ObservedChange::network("GET", "/api/data")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unowned_event_is_handed_back_and_window_continues() {
        let (tx, _stop, mut inbox) = inbox();
        let mut obs = observer();
        obs.arm();

        tx.send(added("first")).unwrap();
        tx.send(PageEvent::Navigated {
            url: "http://localhost:3000/#top".to_string(),
        })
        .unwrap();

        let end = obs
            .await_settlement(&mut inbox, Duration::from_millis(100), Duration::from_secs(5))
            .await;
        assert!(matches!(end, SettleEnd::Event(PageEvent::Navigated { .. })));

        tx.send(added("second")).unwrap();
        let end = obs
            .await_settlement(&mut inbox, Duration::from_millis(100), Duration::from_secs(5))
            .await;
        assert!(matches!(end, SettleEnd::Quiet));
        assert_eq!(
            obs.collect_offline().changes,
            vec![ObservedChange::added("#first"), ObservedChange::added("#second")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_wait() {
        let (_tx, stop, mut inbox) = inbox();
        let mut obs = observer();
        obs.arm();
        stop.send(true).unwrap();

        let end = obs
            .await_settlement(&mut inbox, Duration::from_millis(100), Duration::from_secs(5))
            .await;
        assert!(matches!(end, SettleEnd::Stopped));
    }

    #[test]
    fn test_network_filter_and_dedupe() {
        let mut obs = observer();
        obs.arm();
        for (id, url) in [
            (1, "http://localhost:3000/api/data?x=1"),
            (2, "http://localhost:3000/api/data?x=2"),
            (3, "http://localhost:3000/static/app.js"),
            (4, "http://localhost:3000/sockjs-node/info"),
            (5, "https://www.google-analytics.com/collect?v=1"),
        ] {
            obs.observe(PageEvent::RequestStarted {
                id,
                method: "GET".to_string(),
                url: url.to_string(),
            });
        }
        obs.observe(PageEvent::RequestStarted {
            id: 6,
            method: "POST".to_string(),
            url: "http://localhost:3000/api/data".to_string(),
        });

        assert_eq!(
            obs.collect_offline().changes,
            vec![
                ObservedChange::network("GET", "/api/data"),
                ObservedChange::network("POST", "/api/data"),
            ]
        );
    }

    #[test]
    fn test_ignored_tags_and_fragile_filter() {
        let config = RecorderConfig {
            only_stable_selectors: true,
            ..Default::default()
        };
        let mut obs = ChangeObserver::new(&config, ANCHOR);
        obs.arm();
        obs.observe(PageEvent::DomMutation {
            mutation: RawMutation::ChildAdded {
                element: ElementDescriptor::new("script").with_id("boot"),
            },
        });
        obs.observe(PageEvent::DomMutation {
            mutation: RawMutation::ChildAdded {
                element: ElementDescriptor::new("div").with_classes(&["toast"]),
            },
        });
        obs.observe(added("dropdown"));

        assert_eq!(
            obs.collect_offline().changes,
            vec![ObservedChange::added("#dropdown")]
        );
    }

    #[test]
    fn test_visibility_from_attribute_mutation() {
        let mut obs = observer();
        obs.arm();
        obs.observe(PageEvent::DomMutation {
            mutation: RawMutation::Attribute {
                element: ElementDescriptor::new("div").with_id("menu"),
                attribute: "class".to_string(),
                visible_before: false,
                visible_after: true,
                styles: Vec::new(),
            },
        });
        assert_eq!(
            obs.collect_offline().changes,
            vec![ObservedChange::visibility_changed("#menu", true)]
        );
    }

    #[tokio::test]
    async fn test_css_probe_reports_settled_value() {
        let page = FakePage::new(ANCHOR);
        page.set_style("#save", "background-color", "rgb(0, 128, 0)");
        page.set_style("#save", "opacity", "1");

        let before = |color: &str| {
            BTreeMap::from([
                ("background-color".to_string(), color.to_string()),
                ("opacity".to_string(), "1".to_string()),
            ])
        };

        let mut obs = observer();
        obs.arm();
        obs.observe(PageEvent::DomMutation {
            mutation: RawMutation::Attribute {
                element: ElementDescriptor::new("button").with_id("save"),
                attribute: "class".to_string(),
                visible_before: true,
                visible_after: true,
                styles: vec![
                    StyleSnapshot {
                        element: ElementDescriptor::new("button").with_id("save"),
                        depth: 0,
                        before: before("rgb(128, 128, 128)"),
                    },
                    StyleSnapshot {
                        element: ElementDescriptor::new("span").with_classes(&["label"]),
                        depth: 1,
                        before: before("rgb(0, 0, 0)"),
                    },
                ],
            },
        });

        let observation = obs.collect(&page).await;
        assert_eq!(
            observation.changes,
            vec![ObservedChange::css("#save", "background-color", "rgb(0, 128, 0)")]
        );
    }

    #[test]
    fn test_normalize_keeps_final_state() {
        let (changes, omitted) = normalize(
            vec![
                ObservedChange::added("#spinner"),
                ObservedChange::text_changed("#status", "Loading"),
                ObservedChange::removed("#spinner"),
                ObservedChange::text_changed("#status", "Done"),
                ObservedChange::network("GET", "/api/items"),
                ObservedChange::network("GET", "/api/items"),
            ],
            10,
        );
        assert_eq!(omitted, 0);
        assert_eq!(
            changes,
            vec![
                ObservedChange::removed("#spinner"),
                ObservedChange::text_changed("#status", "Done"),
                ObservedChange::network("GET", "/api/items"),
            ]
        );
    }

    #[test]
    fn test_normalize_drops_text_on_hidden_element() {
        let (changes, _) = normalize(
            vec![
                ObservedChange::text_changed("#toast", "Saved"),
                ObservedChange::visibility_changed("#toast", false),
            ],
            10,
        );
        assert_eq!(changes, vec![ObservedChange::visibility_changed("#toast", false)]);
    }

    #[test]
    fn test_normalize_caps_dom_but_not_network() {
        let mut changes: Vec<ObservedChange> = (0..5)
            .map(|i| ObservedChange::added(&format!("#row-{}", i)))
            .collect();
        changes.push(ObservedChange::network("GET", "/api/rows"));

        let (kept, omitted) = normalize(changes, 3);
        assert_eq!(kept.len(), 4);
        assert_eq!(omitted, 2);
        assert_eq!(kept[3], ObservedChange::network("GET", "/api/rows"));
    }
}
