//! Source-map data model: the v3 regular map / index map tagged union and
//! extraction results (spec §3, §9 "polymorphism as a tagged union").

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw JSON shape of a regular (non-index) source map, as validated by
/// `parser::validate_regular`. Fields keep their optionality from ECMA-426.
#[derive(Debug, Clone)]
pub struct RegularMap {
    pub version: i64,
    pub sources: Vec<Option<String>>,
    pub sources_content: Option<Vec<Option<String>>>,
    pub source_root: Option<String>,
    pub file: Option<String>,
    pub names: Vec<String>,
    pub ignore_list: Vec<u64>,
    pub mappings: String,
}

/// One section of an index map: a generated-position offset plus an inner
/// regular map. Nested index maps are rejected at validation time.
#[derive(Debug, Clone)]
pub struct IndexMapSection {
    pub offset_line: u64,
    pub offset_column: u64,
    pub map: RegularMap,
}

#[derive(Debug, Clone)]
pub struct IndexMap {
    pub version: i64,
    pub file: Option<String>,
    pub sections: Vec<IndexMapSection>,
}

/// The tagged union spec §3/§9 calls for instead of a class hierarchy.
#[derive(Debug, Clone)]
pub enum SourceMap {
    Regular(RegularMap),
    Index(IndexMap),
}

/// One decoded VLQ mapping segment (generated column + up to four deltas).
#[derive(Debug, Clone, Copy, Default)]
pub struct MappingSegment {
    pub generated_column: i64,
    pub source_index: Option<i64>,
    pub original_line: Option<i64>,
    pub original_column: Option<i64>,
    pub name_index: Option<i64>,
}

/// `path` is the normalised, traversal-safe POSIX path derived from
/// `sources[i] + sourceRoot`. Content is never null — null entries are
/// filtered upstream and counted, never materialised here (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedSource {
    pub path: String,
    pub content: String,
    pub original_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub version: i64,
    pub source_root: Option<String>,
    pub total_sources: usize,
    pub extracted_count: usize,
    pub skipped_count: usize,
    pub null_content_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub bundle_url: String,
    pub map_url: String,
    pub files: Vec<ExtractedSource>,
    pub errors: Vec<String>,
    pub metadata: ExtractionMetadata,
}

impl ExtractionResult {
    /// Invariant I3: totalSources = extractedCount + skippedCount + nullContentCount.
    pub fn check_invariant(&self) -> bool {
        self.metadata.total_sources
            == self.metadata.extracted_count + self.metadata.skipped_count + self.metadata.null_content_count
    }
}

/// Raw, not-yet-validated JSON, kept around for classification (regular vs.
/// index) before we commit to one shape.
pub type RawSourceMapJson = Value;
