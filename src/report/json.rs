use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::recorder::session::Recording;
use crate::recorder::types::RecordedAction;

/// Recording dump, re-renderable with `lumi-recorder render`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingReport {
    pub session_id: Uuid,
    pub target_url: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<String>,
    pub actions: Vec<RecordedAction>,
}

impl RecordingReport {
    pub fn from_recording(recording: &Recording) -> Self {
        Self {
            session_id: recording.session_id,
            target_url: recording.target_url.clone(),
            recorded_at: Utc::now(),
            interrupted: recording.interrupted.clone(),
            actions: recording.actions.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write recording: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recording: {}", path.display()))?;
        let report = serde_json::from_str(&content)
            .with_context(|| format!("Invalid recording: {}", path.display()))?;
        Ok(report)
    }
}
