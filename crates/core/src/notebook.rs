//! Notebook document model (nbformat v4 JSON).

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::NotebookError;

/// Content kind of a notebook cell.
///
/// Notebooks may also carry `raw` (or extension-specific) cells; those are
/// preserved at load time and rejected during message extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Markdown,
    Code,
    Raw,
    Unknown,
}

impl<'de> Deserialize<'de> for CellKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        Ok(match tag.as_str() {
            "markdown" => CellKind::Markdown,
            "code" => CellKind::Code,
            "raw" => CellKind::Raw,
            _ => CellKind::Unknown,
        })
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellKind::Markdown => "markdown",
            CellKind::Code => "code",
            CellKind::Raw => "raw",
            CellKind::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// One ordered content unit of a notebook document. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Cell {
    #[serde(rename = "cell_type")]
    pub kind: CellKind,
    #[serde(deserialize_with = "string_or_lines")]
    pub source: String,
}

impl Cell {
    pub fn markdown(source: impl Into<String>) -> Self {
        Self {
            kind: CellKind::Markdown,
            source: source.into(),
        }
    }

    pub fn code(source: impl Into<String>) -> Self {
        Self {
            kind: CellKind::Code,
            source: source.into(),
        }
    }
}

/// A notebook document: an ordered list of cells.
#[derive(Debug, Clone, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
}

impl Notebook {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    /// Parse a notebook from JSON text.
    pub fn from_json(json: &str) -> Result<Self, NotebookError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a notebook from a reader.
    pub fn from_reader(reader: impl Read) -> Result<Self, NotebookError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Read and parse a `.ipynb` file.
    pub fn from_path(path: &Path) -> Result<Self, NotebookError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }
}

/// nbformat stores cell source either as one string or as a list of line
/// strings (each keeping its trailing newline). Accept both.
fn string_or_lines<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Source {
        Joined(String),
        Lines(Vec<String>),
    }

    Ok(match Source::deserialize(deserializer)? {
        Source::Joined(source) => source,
        Source::Lines(lines) => lines.concat(),
    })
}
