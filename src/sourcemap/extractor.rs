//! Streaming extraction of original source files from a validated source
//! map (C4 step 7, spec §4.4/§9: "yield one ExtractedSource at a time").

use super::model::{ExtractedSource, ExtractionMetadata, ExtractionResult, IndexMap, RegularMap, SourceMap};
use super::path::resolve_source_path;

/// Extracts files from a single regular map. `sourcesContent` entries that
/// are `null`, or missing because the array is shorter than `sources`
/// (Open Question decision: warn, extract up to the shorter length, no
/// synthetic entries), are counted in `nullContentCount` rather than
/// materialised. Entries whose path cannot be made traversal-safe are
/// counted in `skippedCount`.
fn extract_regular(map: &RegularMap, bundle_url: &str, map_url: &str) -> ExtractionResult {
    let mut files = Vec::new();
    let mut errors = Vec::new();
    let mut skipped_count = 0usize;
    let mut null_content_count = 0usize;

    let content_len = map.sources_content.as_ref().map(|c| c.len()).unwrap_or(0);
    if let Some(contents) = &map.sources_content {
        if contents.len() != map.sources.len() {
            errors.push(format!(
                "sourcesContent has {} entries but sources has {}; extracting up to the shorter length",
                contents.len(),
                map.sources.len()
            ));
        }
    }

    let usable_len = map.sources.len().min(if map.sources_content.is_some() { content_len } else { 0 });

    for (idx, raw_source) in map.sources.iter().enumerate() {
        let Some(raw_source) = raw_source else {
            skipped_count += 1;
            continue;
        };

        if idx >= usable_len {
            // No sourcesContent entry available for this index at all.
            null_content_count += 1;
            continue;
        }

        let content = match &map.sources_content {
            Some(contents) => match contents.get(idx) {
                Some(Some(text)) => text,
                _ => {
                    null_content_count += 1;
                    continue;
                }
            },
            None => {
                null_content_count += 1;
                continue;
            }
        };

        match resolve_source_path(map.source_root.as_deref(), raw_source) {
            Some(path) => files.push(ExtractedSource {
                path,
                content: content.clone(),
                original_path: Some(raw_source.clone()),
            }),
            None => {
                skipped_count += 1;
                errors.push(format!("source entry {idx} (\"{raw_source}\") could not be resolved to a safe path"));
            }
        }
    }

    let metadata = ExtractionMetadata {
        version: map.version,
        source_root: map.source_root.clone(),
        total_sources: map.sources.len(),
        extracted_count: files.len(),
        skipped_count,
        null_content_count,
    };

    ExtractionResult {
        bundle_url: bundle_url.to_string(),
        map_url: map_url.to_string(),
        files,
        errors,
        metadata,
    }
}

/// Extracts every section of an index map and flattens the results into one
/// combined `ExtractionResult`, summing the per-section counters so
/// invariant I3 still holds at the combined level.
fn extract_index(map: &IndexMap, bundle_url: &str, map_url: &str) -> ExtractionResult {
    let mut files = Vec::new();
    let mut errors = Vec::new();
    let mut total_sources = 0usize;
    let mut extracted_count = 0usize;
    let mut skipped_count = 0usize;
    let mut null_content_count = 0usize;

    for section in &map.sections {
        let section_result = extract_regular(&section.map, bundle_url, map_url);
        total_sources += section_result.metadata.total_sources;
        extracted_count += section_result.metadata.extracted_count;
        skipped_count += section_result.metadata.skipped_count;
        null_content_count += section_result.metadata.null_content_count;
        errors.extend(section_result.errors);
        files.extend(section_result.files);
    }

    let metadata = ExtractionMetadata {
        version: map.version,
        source_root: None,
        total_sources,
        extracted_count,
        skipped_count,
        null_content_count,
    };

    ExtractionResult {
        bundle_url: bundle_url.to_string(),
        map_url: map_url.to_string(),
        files,
        errors,
        metadata,
    }
}

pub fn extract(source_map: &SourceMap, bundle_url: &str, map_url: &str) -> ExtractionResult {
    match source_map {
        SourceMap::Regular(map) => extract_regular(map, bundle_url, map_url),
        SourceMap::Index(map) => extract_index(map, bundle_url, map_url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> RegularMap {
        RegularMap {
            version: 3,
            sources: vec![Some("webpack:///./src/a.js".to_string()), Some("webpack:///./src/b.js".to_string()), None],
            sources_content: Some(vec![Some("content a".to_string()), None, Some("unused".to_string())]),
            source_root: None,
            file: None,
            names: vec![],
            ignore_list: vec![],
            mappings: String::new(),
        }
    }

    #[test]
    fn extracts_available_sources_and_counts_the_rest() {
        let map = sample_map();
        let result = extract_regular(&map, "https://e.com/main.js", "https://e.com/main.js.map");
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].path, "src/a.js");
        assert_eq!(result.metadata.null_content_count, 1);
        assert_eq!(result.metadata.skipped_count, 1);
        assert!(result.check_invariant());
    }

    #[test]
    fn mismatched_sources_content_length_extracts_shorter_side() {
        let map = RegularMap {
            version: 3,
            sources: vec![Some("a.js".to_string()), Some("b.js".to_string())],
            sources_content: Some(vec![Some("only one".to_string())]),
            source_root: None,
            file: None,
            names: vec![],
            ignore_list: vec![],
            mappings: String::new(),
        };
        let result = extract_regular(&map, "https://e.com/main.js", "https://e.com/main.js.map");
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.metadata.null_content_count, 1);
        assert!(!result.errors.is_empty());
        assert!(result.check_invariant());
    }
}
