//! Playwright test script generation
//!
//! Renders a recorded action list as a `@playwright/test` spec. Output is a
//! pure function of its input: no timestamps, ids or map iteration order.

use crate::recorder::types::{ActionKind, DomChangeKind, ObservedChange, RecordedAction, WindowEnd};

const INDENT: &str = "  ";

/// Render a recording as Playwright test source
pub fn render(target_url: &str, actions: &[RecordedAction]) -> String {
    let mut out = String::new();
    out.push_str("import { test, expect } from '@playwright/test';\n\n");
    out.push_str(&format!(
        "test({}, async ({{ page }}) => {{\n",
        js_string(&format!("recorded interaction on {}", target_url))
    ));
    line(&mut out, &format!("await page.goto({});", js_string(target_url)));

    for (i, action) in actions.iter().enumerate() {
        out.push('\n');
        render_action(&mut out, i + 1, target_url, action);
    }

    out.push_str("});\n");
    out
}

fn render_action(out: &mut String, index: usize, target_url: &str, action: &RecordedAction) {
    comment(
        out,
        &format!("Action {}: {} {}", index, action.action_type, action.selector),
    );
    if action.is_fragile {
        comment(
            out,
            &format!(
                "Warning: fragile selector {}, may break when markup changes",
                action.selector
            ),
        );
    }
    for warning in &action.warnings {
        comment(out, &format!("Warning: {}", warning));
    }

    if let Some(url) = action.changes.iter().find_map(|c| match c {
        ObservedChange::Navigation { url } => Some(url),
        _ => None,
    }) {
        line(out, &action_statement(action));
        comment(
            out,
            &format!(
                "Action triggered navigation to {} and was auto-recovered; assertions skipped",
                url
            ),
        );
        if action.warnings.is_empty() {
            line(out, &format!("await page.goto({});", js_string(target_url)));
        }
        return;
    }

    // request waits must be registered before the action fires
    let mut requests = Vec::new();
    for change in &action.changes {
        if let ObservedChange::Network {
            method,
            url_pattern,
        } = change
        {
            let name = format!("request{}_{}", index, requests.len() + 1);
            line(
                out,
                &format!(
                    "const {} = page.waitForRequest(req => req.method() === {} && req.url().split('?')[0].endsWith({}));",
                    name,
                    js_string(method),
                    js_string(url_pattern)
                ),
            );
            requests.push(name);
        }
    }

    line(out, &action_statement(action));

    if let Some(note) = window_note(action.window_end) {
        comment(out, note);
    }

    if action.changes.is_empty() {
        comment(out, "Action produced no observable changes");
        if action.window_end == WindowEnd::Preempted {
            comment(out, "The next action followed before any change was observed");
        }
        return;
    }

    let mut pending_requests = requests.into_iter();
    for change in &action.changes {
        match change {
            ObservedChange::Network { .. } => {
                if let Some(name) = pending_requests.next() {
                    line(out, &format!("await {};", name));
                }
            }
            other => {
                if let Some(assertion) = assertion(other) {
                    line(out, &assertion);
                }
            }
        }
    }

    if action.omitted_changes > 0 {
        comment(
            out,
            &format!("{} more change(s) omitted", action.omitted_changes),
        );
    }
}

fn action_statement(action: &RecordedAction) -> String {
    let selector = js_string(&action.selector);
    match action.action_type {
        ActionKind::Click => format!("await page.click({});", selector),
        ActionKind::Fill => format!(
            "await page.fill({}, {});",
            selector,
            js_string(action.value.as_deref().unwrap_or(""))
        ),
        ActionKind::Keypress => format!(
            "await page.press({}, {});",
            selector,
            js_string(action.value.as_deref().unwrap_or("Enter"))
        ),
    }
}

fn assertion(change: &ObservedChange) -> Option<String> {
    let expect = |selector: &str, matcher: String| {
        format!("await expect(page.locator({})).{};", js_string(selector), matcher)
    };

    match change {
        ObservedChange::Dom { kind, selector } => Some(match kind {
            DomChangeKind::Added => expect(selector, "toBeVisible()".to_string()),
            DomChangeKind::Removed => expect(selector, "toBeHidden()".to_string()),
            DomChangeKind::VisibilityChanged { visible: true } => {
                expect(selector, "toBeVisible()".to_string())
            }
            DomChangeKind::VisibilityChanged { visible: false } => {
                expect(selector, "toBeHidden()".to_string())
            }
            DomChangeKind::TextChanged { text } => {
                expect(selector, format!("toHaveText({})", js_string(text)))
            }
        }),
        ObservedChange::Css {
            selector,
            property,
            value,
        } => Some(expect(
            selector,
            format!("toHaveCSS({}, {})", js_string(property), js_string(value)),
        )),
        ObservedChange::Network { .. } | ObservedChange::Navigation { .. } => None,
    }
}

fn window_note(end: WindowEnd) -> Option<&'static str> {
    if !end.is_partial() {
        return None;
    }
    Some(match end {
        WindowEnd::HardCapped => "Page did not settle before the hard cap; changes may be partial",
        WindowEnd::Stopped => "Recording stopped before the page settled; changes may be partial",
        _ => "Browser crashed before the page settled; changes may be partial",
    })
}

fn line(out: &mut String, text: &str) {
    out.push_str(INDENT);
    out.push_str(text);
    out.push('\n');
}

fn comment(out: &mut String, text: &str) {
    let single_line: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    line(out, &format!("// {}", single_line));
}

/// Single-quoted JavaScript string literal
pub fn js_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
