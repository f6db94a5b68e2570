//! Markdown task checklist parsing with filesystem change notification.
//!
//! Watches one checklist file and republishes the full parsed task list on
//! every change: phase headings come from `##` lines, tasks from checkbox
//! items. The parser is independent of the watcher so it can be tested on
//! plain strings.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Lifecycle of one checklist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

/// One parsed checklist item.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub phase: String,
    pub text: String,
    pub status: TaskStatus,
}

/// Parse a markdown checklist into task records.
///
/// `## Heading` lines set the phase for the items that follow (default
/// `General`). Checkbox markers: `[ ]` pending, `[~]` or `[-]` in progress,
/// `[x]` completed. Everything else is ignored.
pub fn parse_tasks(input: &str) -> Vec<Task> {
    let mut phase = String::from("General");
    let mut tasks = Vec::new();
    for line in input.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("##") {
            let heading = heading.trim_start_matches('#').trim();
            if !heading.is_empty() {
                phase = heading.to_string();
            }
            continue;
        }
        let Some(item) = trimmed
            .strip_prefix("- [")
            .or_else(|| trimmed.strip_prefix("* ["))
        else {
            continue;
        };
        let Some((marker, text)) = item.split_once(']') else {
            continue;
        };
        let status = match marker.trim() {
            "" => TaskStatus::Pending,
            "~" | "-" => TaskStatus::InProgress,
            "x" | "X" => TaskStatus::Completed,
            _ => continue,
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        tasks.push(Task {
            phase: phase.clone(),
            text: text.to_string(),
            status,
        });
    }
    tasks
}

/// Re-reads and re-parses the watched file on every filesystem event that
/// touches it, sending the full task list over `tx`. One initial parse is
/// sent on spawn so consumers start with the current content.
pub struct TaskWatcher {
    _watcher: RecommendedWatcher,
}

impl TaskWatcher {
    pub fn spawn(path: &Path, tx: mpsc::UnboundedSender<Vec<Task>>) -> Result<Self> {
        // Watch the parent directory: editors that replace the file on save
        // would otherwise detach the watch.
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let parent = fs::canonicalize(parent)
            .with_context(|| format!("resolve {}", parent.display()))?;
        let name = path
            .file_name()
            .context("checklist path has no file name")?;
        let watched = parent.join(name);

        let _ = tx.send(read_tasks(&watched));

        let target = watched.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !event.paths.iter().any(|p| p == &target) {
                        return;
                    }
                    if tx.send(read_tasks(&target)).is_err() {
                        debug!("task consumer went away");
                    }
                }
                Err(e) => warn!("watch error: {e:?}"),
            })?;
        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", parent.display()))?;

        Ok(Self { _watcher: watcher })
    }
}

fn read_tasks(path: &Path) -> Vec<Task> {
    match fs::read_to_string(path) {
        Ok(text) => parse_tasks(&text),
        Err(e) => {
            warn!("cannot read {}: {e}", path.display());
            Vec::new()
        }
    }
}
