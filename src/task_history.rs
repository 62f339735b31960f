//! History of executed tasks.
//!
//! Stored as `.reconcile/task_history.json` in the project root. Each entry
//! keeps the hashes of the files the task wrote, so edits made outside the
//! engine since then can be spotted.

use crate::config::STATE_DIR;
use crate::contexts::file_cache::sha256_hex;
use crate::contexts::{ProjectStateStore, TaskReport};
use crate::data::TaskPlan;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const HISTORY_FILE: &str = "task_history.json";
pub const DEFAULT_SUMMARY_LENGTH: usize = 5;

/// One executed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub request: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
    /// `"<type> <path>"` per plan step.
    pub steps: Vec<String>,
    /// Path to SHA-256 of the content the task left behind.
    pub touched: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskHistory {
    entries: Vec<TaskEntry>,
    #[serde(skip)]
    path: PathBuf,
}

impl TaskHistory {
    /// Loads the history of the project at `root`.
    ///
    /// A missing file is an empty history; so is a corrupt one, after a warning.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::history_path(root);
        if !path.exists() {
            return Ok(Self {
                entries: Vec::new(),
                path,
            });
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read task history {}", path.display()))?;
        let entries = match serde_json::from_str::<TaskHistory>(&content) {
            Ok(history) => history.entries,
            Err(e) => {
                tracing::warn!(error = %e, "task history is corrupt, starting a new one");
                Vec::new()
            }
        };
        Ok(Self { entries, path })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize task history")?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write task history {}", self.path.display()))?;
        Ok(())
    }

    fn history_path(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join(HISTORY_FILE)
    }

    /// Appends an entry for a finished task.
    pub fn record(
        &mut self,
        request: &str,
        plan: &TaskPlan,
        report: &TaskReport,
        store: &ProjectStateStore,
    ) {
        let touched = report
            .touched
            .iter()
            .filter(|path| store.contains(path))
            .map(|path| (path.clone(), sha256_hex(store.get(path))))
            .collect();

        self.entries.push(TaskEntry {
            request: request.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            steps: plan
                .steps
                .iter()
                .map(|s| format!("{} {}", s.kind.as_str(), s.file_path))
                .collect(),
            touched,
            warnings: report.warnings.iter().map(|w| w.to_string()).collect(),
        });
    }

    pub fn entries(&self) -> &[TaskEntry] {
        &self.entries
    }

    /// Files whose content differs from what the last task touching them wrote.
    pub fn modified_since_recorded(&self, store: &ProjectStateStore) -> Vec<String> {
        let mut latest: BTreeMap<&str, &str> = BTreeMap::new();
        for entry in &self.entries {
            for (path, hash) in &entry.touched {
                latest.insert(path, hash);
            }
        }
        latest
            .into_iter()
            .filter(|(path, hash)| !store.contains(path) || sha256_hex(store.get(path)) != *hash)
            .map(|(path, _)| path.to_string())
            .collect()
    }

    /// Human-readable list of the last `count` tasks, newest last.
    pub fn summary(&self, count: usize) -> String {
        let mut lines = vec!["Task History:".to_string()];
        if self.entries.is_empty() {
            lines.push("  No tasks recorded".to_string());
            return lines.join("\n");
        }

        let skip = self.entries.len().saturating_sub(count);
        for entry in self.entries.iter().skip(skip) {
            lines.push(format!("\n{} ({})", entry.request, entry.timestamp));
            for step in &entry.steps {
                lines.push(format!("  {}", step));
            }
            for warning in &entry.warnings {
                lines.push(format!("  warning: {}", warning));
            }
        }
        lines.join("\n")
    }
}
