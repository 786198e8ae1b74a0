pub mod json;
pub mod playwright;

use crate::recorder::types::RecordedAction;

/// Render recorded actions as a Playwright test script
pub fn render_script(target_url: &str, actions: &[RecordedAction]) -> String {
    playwright::render(target_url, actions)
}
