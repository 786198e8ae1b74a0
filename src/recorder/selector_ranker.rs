//! Selector Ranking
//!
//! Picks one CSS selector for an element snapshot. The ranking prefers the
//! attributes least likely to change when unrelated markup is refactored:
//!
//! Priority order: data-testid > id > aria-label > tag.classes > tag
//!
//! # Tiers
//! - **data-testid**, **id**, **aria-label**: stable
//! - **tag + classes**, **tag only**: fragile

use super::types::ElementDescriptor;

/// Which attribute the chosen selector is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorTier {
    TestId,
    Id,
    AriaLabel,
    TagClasses,
    Tag,
}

impl SelectorTier {
    pub fn is_fragile(&self) -> bool {
        matches!(self, SelectorTier::TagClasses | SelectorTier::Tag)
    }
}

/// Outcome of ranking an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorResult {
    pub selector: String,
    pub is_fragile: bool,
    pub tier: SelectorTier,
}

impl SelectorResult {
    fn new(selector: String, tier: SelectorTier) -> Self {
        Self {
            selector,
            is_fragile: tier.is_fragile(),
            tier,
        }
    }

    /// Get a short representation for log lines
    pub fn short_repr(&self) -> String {
        if self.is_fragile {
            format!("{} (fragile)", self.selector)
        } else {
            self.selector.clone()
        }
    }
}

/// Rank an element descriptor into a selector. Total: always returns a value.
pub fn rank(element: &ElementDescriptor) -> SelectorResult {
    let tag = normalize_tag(&element.tag);

    let test_id = element.test_id.trim();
    if !test_id.is_empty() {
        return SelectorResult::new(
            format!("[data-testid=\"{}\"]", escape_attribute_value(test_id)),
            SelectorTier::TestId,
        );
    }

    let id = element.id.trim();
    if !id.is_empty() {
        return SelectorResult::new(format!("#{}", escape_ident(id)), SelectorTier::Id);
    }

    let aria_label = element.aria_label.trim();
    if !aria_label.is_empty() {
        return SelectorResult::new(
            format!("{}[aria-label=\"{}\"]", tag, escape_attribute_value(aria_label)),
            SelectorTier::AriaLabel,
        );
    }

    let classes: Vec<String> = element
        .classes
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(escape_ident)
        .collect();
    if !classes.is_empty() {
        return SelectorResult::new(
            format!("{}.{}", tag, classes.join(".")),
            SelectorTier::TagClasses,
        );
    }

    SelectorResult::new(tag, SelectorTier::Tag)
}

fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim().to_lowercase();
    if tag.is_empty() {
        "*".to_string()
    } else {
        tag
    }
}

/// Escape a value placed inside a double-quoted attribute selector
fn escape_attribute_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Escape an id or class name so it can follow `#` or `.` in a selector
fn escape_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    for (i, c) in ident.chars().enumerate() {
        if c.is_ascii_digit() && i == 0 {
            // Leading digits need a hex escape followed by a space
            out.push_str(&format!("\\{:x} ", c as u32));
        } else if c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_testid_wins_over_id() {
        let el = ElementDescriptor::new("button")
            .with_test_id("x")
            .with_id("y")
            .with_aria_label("Close");
        let result = rank(&el);
        assert_eq!(result.selector, r#"[data-testid="x"]"#);
        assert!(!result.is_fragile);
        assert_eq!(result.tier, SelectorTier::TestId);
    }

    #[test]
    fn test_priority_chain() {
        let el = ElementDescriptor::new("button")
            .with_id("toggle-btn")
            .with_aria_label("Toggle")
            .with_classes(&["btn"]);
        assert_eq!(rank(&el).selector, "#toggle-btn");

        let el = ElementDescriptor::new("button")
            .with_aria_label("Toggle menu")
            .with_classes(&["btn"]);
        let result = rank(&el);
        assert_eq!(result.selector, r#"button[aria-label="Toggle menu"]"#);
        assert!(!result.is_fragile);
    }

    #[test]
    fn test_classes_are_fragile_and_keep_dom_order() {
        let el = ElementDescriptor::new("DIV").with_classes(&["card", " ", "active"]);
        let result = rank(&el);
        assert_eq!(result.selector, "div.card.active");
        assert!(result.is_fragile);
    }

    #[test]
    fn test_bare_tag_fallback() {
        let result = rank(&ElementDescriptor::new("span"));
        assert_eq!(result.selector, "span");
        assert!(result.is_fragile);
        assert_eq!(result.tier, SelectorTier::Tag);

        assert_eq!(rank(&ElementDescriptor::default()).selector, "*");
    }

    #[test]
    fn test_whitespace_attributes_are_ignored() {
        let el = ElementDescriptor::new("a").with_test_id("  ").with_id("nav-link");
        assert_eq!(rank(&el).selector, "#nav-link");
    }

    #[test]
    fn test_escaping() {
        let el = ElementDescriptor::new("input").with_test_id(r#"say "hi""#);
        assert_eq!(rank(&el).selector, r#"[data-testid="say \"hi\""]"#);

        let el = ElementDescriptor::new("div").with_classes(&["md:flex", "w-1/2"]);
        assert_eq!(rank(&el).selector, r"div.md\:flex.w-1\/2");

        let el = ElementDescriptor::new("div").with_id("1st");
        assert_eq!(rank(&el).selector, r"#\31 st");
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let el = ElementDescriptor::new("li").with_classes(&["item", "selected"]);
        assert_eq!(rank(&el), rank(&el));
    }
}
