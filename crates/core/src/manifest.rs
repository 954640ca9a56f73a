//! Tracking manifest: a CSV listing of notebook tasks for batch runs.
//!
//! Rows mirror the columns of the delivery tracking sheets this pipeline was
//! historically driven by; a `task_link` URL column is accepted in place of a
//! bare task id.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::NotebookError;

/// One tracked notebook task.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestRow {
    #[serde(alias = "task_link")]
    pub task_id: String,
    pub batch_id: Option<u32>,
    pub completion_date: Option<String>,
    #[serde(alias = "assigned_to_email")]
    pub contributor: Option<String>,
    #[serde(alias = "completion_status")]
    pub status: Option<String>,
}

impl ManifestRow {
    /// Metadata entries this row contributes to a converted record.
    pub fn metadata_entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = Vec::new();
        if let Some(batch_id) = self.batch_id {
            entries.push(("batch_id", batch_id.to_string()));
        }
        if let Some(date) = &self.completion_date {
            entries.push(("completion_date", date.clone()));
        }
        if let Some(contributor) = &self.contributor {
            entries.push(("contributor", contributor.clone()));
        }
        entries
    }
}

/// A parsed tracking manifest, keyed by task id.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    rows: HashMap<String, ManifestRow>,
}

impl Manifest {
    /// Read a manifest CSV. Unknown columns are ignored; a `task_link` URL is
    /// reduced to its trailing path segment.
    pub fn from_path(path: &Path) -> Result<Self, NotebookError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut rows = HashMap::new();
        for result in reader.deserialize() {
            let mut row: ManifestRow = result?;
            row.task_id = task_id_from_link(&row.task_id);
            rows.insert(row.task_id.clone(), row);
        }
        Ok(Self { rows })
    }

    pub fn get(&self, task_id: &str) -> Option<&ManifestRow> {
        self.rows.get(task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.rows.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Reduce a task link to its trailing path segment; bare ids pass through.
fn task_id_from_link(link: &str) -> String {
    link.rsplit('/').next().unwrap_or(link).trim().to_string()
}
