//! Batch pipeline for processing notebook files into conversation records.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use walkdir::WalkDir;

use crate::conversation::{ConversationRecord, NotebookConverter};
use crate::error::NotebookError;
use crate::manifest::Manifest;
use crate::notebook::Notebook;
use crate::CompletionService;

/// Configuration for the batch pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Records with fewer merged messages than this are skipped.
    pub min_messages: usize,
    /// Fraction of records routed to the validation split.
    pub val_ratio: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_messages: 2,
            val_ratio: 0.1,
        }
    }
}

/// Result of converting a single notebook.
#[derive(Debug)]
pub struct NotebookResult {
    pub record: ConversationRecord,
    pub source_path: String,
}

/// Aggregate counts of a full batch run.
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub total_notebooks: usize,
    pub total_records: usize,
    pub train_records: usize,
    pub val_records: usize,
    pub total_messages: usize,
    pub total_turn_groups: usize,
}

/// One line of the JSONL output.
#[derive(Debug, Serialize)]
struct ExportRecord<'a> {
    source: &'a str,
    #[serde(flatten)]
    record: &'a ConversationRecord,
}

/// Discover all notebook files in a directory.
pub fn discover_notebook_files(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "ipynb"))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();
    paths
}

/// Read and convert a single notebook file.
pub fn process_notebook<S>(path: &Path, service: &S) -> Result<ConversationRecord, NotebookError>
where
    S: CompletionService,
{
    let notebook = Notebook::from_path(path)?;
    NotebookConverter::new(service).convert(&notebook)
}

/// Process all notebooks under a directory in parallel.
///
/// Uses rayon for parallel processing; the completion service is shared
/// across worker threads and must be `Sync`. A failed notebook is logged and
/// counted without affecting its siblings. When a manifest is given, only
/// notebooks whose file stem appears in it are processed, and the matching
/// row's fields are merged into the record metadata (never overwriting keys
/// the notebook itself provided).
pub fn process_all_notebooks<S>(
    notebook_root: &Path,
    service: &S,
    config: &PipelineConfig,
    manifest: Option<&Manifest>,
) -> Result<Vec<NotebookResult>, NotebookError>
where
    S: CompletionService + Sync,
{
    let mut files = discover_notebook_files(notebook_root);
    if let Some(manifest) = manifest {
        files.retain(|path| manifest.contains(&file_stem(path)));
    }
    if files.is_empty() {
        return Err(NotebookError::EmptyBatch {
            root: notebook_root.to_path_buf(),
        });
    }

    let total_files = files.len();
    let processed_count = AtomicUsize::new(0);
    let error_count = AtomicUsize::new(0);
    let skipped_count = AtomicUsize::new(0);

    let results: Vec<NotebookResult> = files
        .into_par_iter()
        .filter_map(|path| {
            let result = process_notebook(&path, service);
            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 25 == 0 || count == total_files {
                log::info!("processed {}/{} notebooks", count, total_files);
            }

            match result {
                Ok(mut record) => {
                    if record.messages.len() < config.min_messages {
                        skipped_count.fetch_add(1, Ordering::Relaxed);
                        log::warn!(
                            "skipping {:?}: only {} message(s) after merging",
                            path,
                            record.messages.len()
                        );
                        return None;
                    }
                    if let Some(row) = manifest.and_then(|m| m.get(&file_stem(&path))) {
                        for (key, value) in row.metadata_entries() {
                            record.metadata.entry(key.to_string()).or_insert(value);
                        }
                    }
                    Some(NotebookResult {
                        record,
                        source_path: path.to_string_lossy().to_string(),
                    })
                }
                Err(error) => {
                    error_count.fetch_add(1, Ordering::Relaxed);
                    log::warn!("error processing {:?}: {}", path, error);
                    None
                }
            }
        })
        .collect();

    let errors = error_count.load(Ordering::Relaxed);
    if errors > 0 {
        log::warn!("{} notebook(s) failed to process", errors);
    }
    let skipped = skipped_count.load(Ordering::Relaxed);
    if skipped > 0 {
        log::info!("{} notebook(s) skipped below the message minimum", skipped);
    }

    Ok(results)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Write conversation records to JSONL files (training and validation).
pub fn write_jsonl_output(
    results: Vec<NotebookResult>,
    output_dir: &Path,
    val_ratio: f64,
) -> Result<PipelineResult, NotebookError> {
    use std::fs::File;
    use std::io::{BufWriter, Write};

    std::fs::create_dir_all(output_dir)?;

    // Shuffle records for the train/val split (simple deterministic shuffle)
    let mut records: Vec<_> = results.into_iter().enumerate().collect();
    records.sort_by(|(i, a), (j, b)| {
        let hash_a = (i * 2654435761) % 1000;
        let hash_b = (j * 2654435761) % 1000;
        hash_a
            .cmp(&hash_b)
            .then_with(|| a.source_path.cmp(&b.source_path))
    });

    let total_notebooks = records.len();
    let val_count = (total_notebooks as f64 * val_ratio).round() as usize;
    let train_count = total_notebooks - val_count;

    let train_path = output_dir.join("training.jsonl");
    let val_path = output_dir.join("validation.jsonl");

    let mut train_file = BufWriter::new(File::create(&train_path)?);
    let mut val_file = BufWriter::new(File::create(&val_path)?);

    let mut train_records = 0;
    let mut val_records = 0;
    let mut total_messages = 0;
    let mut total_turn_groups = 0;

    for (idx, (_, result)) in records.into_iter().enumerate() {
        let is_validation = idx >= train_count;

        let line = serde_json::to_string(&ExportRecord {
            source: &result.source_path,
            record: &result.record,
        })?;

        if is_validation {
            writeln!(val_file, "{}", line)?;
            val_records += 1;
        } else {
            writeln!(train_file, "{}", line)?;
            train_records += 1;
        }

        total_messages += result.record.messages.len();
        total_turn_groups += result.record.turns.len();
    }

    train_file.flush()?;
    val_file.flush()?;

    Ok(PipelineResult {
        total_notebooks,
        total_records: train_records + val_records,
        train_records,
        val_records,
        total_messages,
        total_turn_groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompletionRequest, ServiceError};
    use std::io::Write;
    use tempfile::TempDir;

    /// Completion service that always replies with the same text.
    struct FixedService(&'static str);

    impl CompletionService for FixedService {
        fn complete(&self, _request: &CompletionRequest) -> Result<String, ServiceError> {
            Ok(self.0.to_string())
        }
    }

    const DIALOGUE_NOTEBOOK: &str = r##"{"cells": [
        {"cell_type": "markdown", "source": "# Metadata\n\n**Type** - Conversation"},
        {"cell_type": "markdown", "source": "# Conversation"},
        {"cell_type": "markdown", "source": "**User**\nHello"},
        {"cell_type": "markdown", "source": "**Assistant**\nHi"}
    ]}"##;

    fn write_notebook(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{}", DIALOGUE_NOTEBOOK).unwrap();
        path
    }

    #[test]
    fn test_discover_notebook_files() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("subdir")).unwrap();
        write_notebook(temp.path(), "a.ipynb");
        write_notebook(&temp.path().join("subdir"), "b.ipynb");
        std::fs::write(temp.path().join("notes.txt"), "not a notebook").unwrap();

        let files = discover_notebook_files(temp.path());
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_process_notebook_file() {
        let temp = TempDir::new().unwrap();
        let path = write_notebook(temp.path(), "task.ipynb");

        let record = process_notebook(&path, &FixedService("User")).unwrap();
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.turns.len(), 1);
    }

    #[test]
    fn test_process_all_notebooks() {
        let temp = TempDir::new().unwrap();
        write_notebook(temp.path(), "one.ipynb");
        write_notebook(temp.path(), "two.ipynb");

        let results = process_all_notebooks(
            temp.path(),
            &FixedService("User"),
            &PipelineConfig::default(),
            None,
        )
        .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let temp = TempDir::new().unwrap();
        let error = process_all_notebooks(
            temp.path(),
            &FixedService("User"),
            &PipelineConfig::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(error, NotebookError::EmptyBatch { .. }));
    }

    #[test]
    fn test_min_messages_skips_short_records() {
        let temp = TempDir::new().unwrap();
        write_notebook(temp.path(), "short.ipynb");

        let config = PipelineConfig {
            min_messages: 3,
            ..Default::default()
        };
        let results =
            process_all_notebooks(temp.path(), &FixedService("User"), &config, None).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_manifest_filters_and_enriches() {
        let temp = TempDir::new().unwrap();
        write_notebook(temp.path(), "abc123.ipynb");
        write_notebook(temp.path(), "untracked.ipynb");

        let manifest_path = temp.path().join("tracking.csv");
        std::fs::write(
            &manifest_path,
            "task_id,batch_id,completion_date,contributor,status\n\
             abc123,4,2024-02-01,ann@example.com,delivered\n",
        )
        .unwrap();
        let manifest = Manifest::from_path(&manifest_path).unwrap();

        let results = process_all_notebooks(
            temp.path(),
            &FixedService("User"),
            &PipelineConfig::default(),
            Some(&manifest),
        )
        .unwrap();

        assert_eq!(results.len(), 1);
        let record = &results[0].record;
        assert_eq!(record.metadata.get("batch_id").map(String::as_str), Some("4"));
        assert_eq!(
            record.metadata.get("contributor").map(String::as_str),
            Some("ann@example.com")
        );
        // The notebook's own metadata wins over manifest fields.
        assert_eq!(
            record.metadata.get("type").map(String::as_str),
            Some("Conversation")
        );
    }

    #[test]
    fn test_write_jsonl_output() {
        let temp = TempDir::new().unwrap();
        write_notebook(temp.path(), "one.ipynb");
        write_notebook(temp.path(), "two.ipynb");

        let results = process_all_notebooks(
            temp.path(),
            &FixedService("User"),
            &PipelineConfig::default(),
            None,
        )
        .unwrap();

        let output_dir = temp.path().join("out");
        let summary = write_jsonl_output(results, &output_dir, 0.5).unwrap();
        assert_eq!(summary.total_records, 2);
        assert_eq!(summary.train_records, 1);
        assert_eq!(summary.val_records, 1);
        assert_eq!(summary.total_messages, 4);

        let train = std::fs::read_to_string(output_dir.join("training.jsonl")).unwrap();
        let line: serde_json::Value = serde_json::from_str(train.lines().next().unwrap()).unwrap();
        assert!(line["source"].as_str().unwrap().ends_with(".ipynb"));
        assert_eq!(line["messages"].as_array().unwrap().len(), 2);
        assert_eq!(line["turns"][0][0]["role"], "Human");
    }
}
