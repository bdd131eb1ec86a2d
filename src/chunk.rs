//! Core data model: chunks, projects, file hashes, and the typed metadata
//! value that replaces a dynamically-typed bag at the language boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A half-open `[start, end)` line range, 1-indexed at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn new(start: u32, end: u32) -> Self {
        let end = end.max(start + 1);
        LineRange { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fraction of the smaller range's length that overlaps the other,
    /// in `[0, 1]`. Used by the context assembler's duplicate test.
    pub fn overlap_fraction(&self, other: &LineRange) -> f32 {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end <= start {
            return 0.0;
        }
        let overlap = (end - start) as f32;
        let smaller = self.len().min(other.len()).max(1) as f32;
        overlap / smaller
    }
}

/// File type classification carried on a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Code,
    Docs,
    Config,
    Unknown,
}

impl Default for FileType {
    fn default() -> Self {
        FileType::Unknown
    }
}

impl std::str::FromStr for FileType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "code" => FileType::Code,
            "docs" => FileType::Docs,
            "config" => FileType::Config,
            _ => FileType::Unknown,
        })
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileType::Code => "code",
            FileType::Docs => "docs",
            FileType::Config => "config",
            FileType::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A typed, tagged-variant metadata value. Replaces the `Record<string,
/// unknown>` bag named in the design notes: downstream readers go through
/// `as_str`/`as_i64`/etc rather than structural typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetaValue]> {
        match self {
            MetaValue::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

/// Free-form metadata map attached to a chunk.
pub type Metadata = BTreeMap<String, MetaValue>;

/// The atomic retrievable unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub file_path: String,
    pub file_type: FileType,
    pub language: Option<String>,
    pub line_range: LineRange,
    pub metadata: Metadata,
}

impl Chunk {
    /// Validates the invariants this chunk must hold before it can be
    /// inserted: finite embedding components and a non-empty identifier.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("chunk id must not be empty".to_string());
        }
        if self.embedding.iter().any(|v| !v.is_finite()) {
            return Err(format!(
                "chunk {} has a non-finite embedding component",
                self.id
            ));
        }
        Ok(())
    }
}

/// A named, path-anchored collection of chunks with a recorded embedding
/// model identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub path: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub file_count: u64,
    pub chunk_count: u64,
    pub indexed_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub tags: Vec<String>,
    pub description: Option<String>,
}

impl Project {
    /// Whether two projects can be safely queried together: same model
    /// name and dimension.
    pub fn model_compatible(&self, other: &Project) -> bool {
        self.embedding_model == other.embedding_model
            && self.embedding_dimensions == other.embedding_dimensions
    }
}

/// Per-`(project_id, file_path)` content hash and the chunk ids it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHash {
    pub project_id: String,
    pub file_path: String,
    pub hash: String,
    pub chunk_ids: Vec<String>,
    pub indexed_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_fraction_full_overlap_is_one() {
        let a = LineRange::new(10, 20);
        let b = LineRange::new(10, 20);
        assert_eq!(a.overlap_fraction(&b), 1.0);
    }

    #[test]
    fn overlap_fraction_disjoint_is_zero() {
        let a = LineRange::new(10, 20);
        let b = LineRange::new(30, 40);
        assert_eq!(a.overlap_fraction(&b), 0.0);
    }

    #[test]
    fn overlap_fraction_partial() {
        let a = LineRange::new(0, 10);
        let b = LineRange::new(5, 15);
        // overlap [5,10) = 5 lines, smaller range len = 10
        assert_eq!(a.overlap_fraction(&b), 0.5);
    }

    #[test]
    fn file_type_round_trips_through_str() {
        assert_eq!("code".parse::<FileType>().unwrap(), FileType::Code);
        assert_eq!("weird".parse::<FileType>().unwrap(), FileType::Unknown);
    }

    #[test]
    fn chunk_validate_rejects_non_finite_embedding() {
        let chunk = Chunk {
            id: "a".into(),
            project_id: "p".into(),
            content: "x".into(),
            embedding: vec![1.0, f32::NAN],
            file_path: "a.rs".into(),
            file_type: FileType::Code,
            language: Some("rust".into()),
            line_range: LineRange::new(1, 2),
            metadata: Metadata::new(),
        };
        assert!(chunk.validate().is_err());
    }
}
