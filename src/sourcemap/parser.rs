//! JSON parsing, classification (regular vs. index) and structural
//! validation of a source map (spec §4.4 steps 2-6).

use serde_json::Value;

use crate::error::{SourceMapError, SourceMapErrorCode};

use super::model::{IndexMap, IndexMapSection, RegularMap, SourceMap};

/// Refuse to even attempt parsing a source map larger than this; guards
/// against pathological bundles claiming a multi-gigabyte map (spec §4.4
/// step 1: "configurable size cap, default ~100 MB").
pub const MAX_SOURCE_MAP_BYTES: usize = 100 * 1024 * 1024;

/// Parses raw bytes/text into a validated `SourceMap`. This is the single
/// entry point C4 calls after fetching or decoding an inline map.
pub fn parse_and_validate(text: &str) -> Result<SourceMap, SourceMapError> {
    if text.len() > MAX_SOURCE_MAP_BYTES {
        return Err(SourceMapError::new(
            SourceMapErrorCode::SourceMapTooLarge,
            format!("source map is {} bytes, exceeds limit of {MAX_SOURCE_MAP_BYTES}", text.len()),
        ));
    }

    let value: Value = serde_json::from_str(text)
        .map_err(|e| SourceMapError::new(SourceMapErrorCode::InvalidJson, e.to_string()))?;

    let obj = value.as_object().ok_or_else(|| {
        SourceMapError::new(SourceMapErrorCode::InvalidJson, "source map root is not a JSON object")
    })?;

    let version = match obj.get("version") {
        None => {
            return Err(SourceMapError::new(SourceMapErrorCode::MissingVersion, "version field is missing"))
        }
        Some(v) => v.as_i64().ok_or_else(|| {
            SourceMapError::new(SourceMapErrorCode::InvalidVersion, "version is not an integer")
        })?,
    };
    if version != 3 {
        return Err(SourceMapError::new(
            SourceMapErrorCode::InvalidVersion,
            format!("unsupported source map version {version}, only 3 is supported"),
        ));
    }

    if obj.contains_key("sections") {
        validate_index_map(obj, version).map(SourceMap::Index)
    } else {
        validate_regular_map(obj, version).map(SourceMap::Regular)
    }
}

fn opt_string(obj: &serde_json::Map<String, Value>, key: &str, code: SourceMapErrorCode) -> Result<Option<String>, SourceMapError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(SourceMapError::new(code, format!("{key} is present but not a string"))),
    }
}

fn validate_regular_map(
    obj: &serde_json::Map<String, Value>,
    version: i64,
) -> Result<RegularMap, SourceMapError> {
    let sources_value = obj
        .get("sources")
        .ok_or_else(|| SourceMapError::new(SourceMapErrorCode::MissingSources, "sources field is missing"))?;
    let sources_arr = sources_value
        .as_array()
        .ok_or_else(|| SourceMapError::new(SourceMapErrorCode::SourcesNotArray, "sources is not an array"))?;

    let mut sources = Vec::with_capacity(sources_arr.len());
    for entry in sources_arr {
        match entry {
            Value::Null => sources.push(None),
            Value::String(s) => sources.push(Some(s.clone())),
            _ => {
                return Err(SourceMapError::new(
                    SourceMapErrorCode::SourcesNotArray,
                    "sources entry is neither string nor null",
                ))
            }
        }
    }

    let mappings = match obj.get("mappings") {
        None => {
            return Err(SourceMapError::new(SourceMapErrorCode::MissingMappings, "mappings field is missing"))
        }
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            return Err(SourceMapError::new(SourceMapErrorCode::MissingMappings, "mappings is not a string"))
        }
    };

    let source_root = opt_string(obj, "sourceRoot", SourceMapErrorCode::InvalidSourceRoot)?;
    let file = opt_string(obj, "file", SourceMapErrorCode::InvalidFile)?;

    let names = match obj.get("names") {
        None => Vec::new(),
        Some(Value::Array(arr)) => {
            let mut names = Vec::with_capacity(arr.len());
            for entry in arr {
                match entry {
                    Value::String(s) => names.push(s.clone()),
                    _ => {
                        return Err(SourceMapError::new(
                            SourceMapErrorCode::InvalidNames,
                            "names entry is not a string",
                        ))
                    }
                }
            }
            names
        }
        Some(_) => return Err(SourceMapError::new(SourceMapErrorCode::InvalidNames, "names is not an array")),
    };

    let sources_content = match obj.get("sourcesContent") {
        None | Some(Value::Null) => None,
        Some(Value::Array(arr)) => {
            let mut out = Vec::with_capacity(arr.len());
            for entry in arr {
                match entry {
                    Value::Null => out.push(None),
                    Value::String(s) => out.push(Some(s.clone())),
                    _ => {
                        return Err(SourceMapError::new(
                            SourceMapErrorCode::InvalidSourcesContent,
                            "sourcesContent entry is neither string nor null",
                        ))
                    }
                }
            }
            Some(out)
        }
        Some(_) => {
            return Err(SourceMapError::new(
                SourceMapErrorCode::InvalidSourcesContent,
                "sourcesContent is not an array",
            ))
        }
    };

    let ignore_list_key = if obj.contains_key("ignoreList") { "ignoreList" } else { "x_google_ignoreList" };
    let ignore_list = match obj.get(ignore_list_key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(arr)) => {
            let mut out = Vec::with_capacity(arr.len());
            for entry in arr {
                let idx = entry.as_u64().ok_or_else(|| {
                    SourceMapError::new(SourceMapErrorCode::InvalidIgnoreList, "ignoreList entry is not a non-negative integer")
                })?;
                if idx as usize >= sources.len() {
                    return Err(SourceMapError::new(
                        SourceMapErrorCode::InvalidIgnoreList,
                        format!("ignoreList index {idx} out of bounds for {} sources", sources.len()),
                    ));
                }
                out.push(idx);
            }
            out
        }
        Some(_) => {
            return Err(SourceMapError::new(SourceMapErrorCode::InvalidIgnoreList, "ignoreList is not an array"))
        }
    };

    super::vlq::validate_mapping_bounds(&mappings, sources.len(), names.len())?;

    Ok(RegularMap {
        version,
        sources,
        sources_content,
        source_root,
        file,
        names,
        ignore_list,
        mappings,
    })
}

fn validate_index_map(
    obj: &serde_json::Map<String, Value>,
    version: i64,
) -> Result<IndexMap, SourceMapError> {
    if obj.contains_key("mappings") {
        return Err(SourceMapError::new(
            SourceMapErrorCode::IndexMapWithMappings,
            "index map must not have a top-level mappings field",
        ));
    }

    let file = opt_string(obj, "file", SourceMapErrorCode::InvalidFile)?;

    let sections_value = obj.get("sections").and_then(|v| v.as_array()).ok_or_else(|| {
        SourceMapError::new(SourceMapErrorCode::InvalidIndexMapSections, "sections is not an array")
    })?;

    let mut sections = Vec::with_capacity(sections_value.len());
    for section in sections_value {
        let section_obj = section.as_object().ok_or_else(|| {
            SourceMapError::new(SourceMapErrorCode::InvalidIndexMapSections, "section entry is not an object")
        })?;

        let offset = section_obj.get("offset").and_then(|v| v.as_object()).ok_or_else(|| {
            SourceMapError::new(SourceMapErrorCode::InvalidIndexMapOffset, "section offset is missing or not an object")
        })?;
        let offset_line = offset.get("line").and_then(|v| v.as_u64()).ok_or_else(|| {
            SourceMapError::new(SourceMapErrorCode::InvalidIndexMapOffset, "offset.line is missing or not a non-negative integer")
        })?;
        let offset_column = offset.get("column").and_then(|v| v.as_u64()).ok_or_else(|| {
            SourceMapError::new(SourceMapErrorCode::InvalidIndexMapOffset, "offset.column is missing or not a non-negative integer")
        })?;

        let inner_value = section_obj.get("map").ok_or_else(|| {
            SourceMapError::new(SourceMapErrorCode::InvalidIndexMapSectionMap, "section map is missing")
        })?;
        let inner_obj = inner_value.as_object().ok_or_else(|| {
            SourceMapError::new(SourceMapErrorCode::InvalidIndexMapSectionMap, "section map is not an object")
        })?;
        if inner_obj.contains_key("sections") {
            return Err(SourceMapError::new(
                SourceMapErrorCode::IndexMapNested,
                "index maps may not nest another index map inside a section",
            ));
        }
        let inner_version = inner_obj.get("version").and_then(|v| v.as_i64()).unwrap_or(version);
        let map = validate_regular_map(inner_obj, inner_version)
            .map_err(|e| SourceMapError::new(SourceMapErrorCode::InvalidIndexMapSectionMap, e.message))?;

        sections.push(IndexMapSection { offset_line, offset_column, map });
    }

    // Spec §4.4 step 6: sections must not overlap "based on the
    // generated-position range implied by their inner maps" — not merely by
    // their declared `offset`. Compute each section's generated-position
    // end (its offset plus the extent its own `mappings` spans) so a
    // section whose content runs past the next section's start is caught
    // even when the raw offsets are themselves strictly increasing.
    let mut ends = Vec::with_capacity(sections.len());
    for section in &sections {
        let (lines_spanned, last_column) = super::vlq::generated_extent(&section.map.mappings)
            .map_err(|e| SourceMapError::new(SourceMapErrorCode::InvalidIndexMapSectionMap, e.message))?;
        let end_line = section.offset_line + lines_spanned;
        let end_column = if lines_spanned == 0 { section.offset_column + last_column as u64 } else { last_column as u64 };
        ends.push((end_line, end_column));
    }

    for i in 0..sections.len().saturating_sub(1) {
        let a_key = (sections[i].offset_line, sections[i].offset_column);
        let b_key = (sections[i + 1].offset_line, sections[i + 1].offset_column);
        if b_key < a_key {
            return Err(SourceMapError::new(
                SourceMapErrorCode::IndexMapInvalidOrder,
                "sections are not in non-decreasing offset order",
            ));
        }
        if b_key == a_key || ends[i] > b_key {
            return Err(SourceMapError::new(
                SourceMapErrorCode::IndexMapOverlap,
                "a section's generated-position extent overlaps the next section's start",
            ));
        }
    }

    Ok(IndexMap { version, file, sections })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_map_json() -> String {
        serde_json::json!({
            "version": 3,
            "sources": ["a.js", null],
            "names": ["foo"],
            "mappings": "AAAA",
            "sourcesContent": ["content a", null]
        })
        .to_string()
    }

    #[test]
    fn parses_minimal_regular_map() {
        let parsed = parse_and_validate(&minimal_map_json()).unwrap();
        match parsed {
            SourceMap::Regular(map) => {
                assert_eq!(map.sources.len(), 2);
                assert_eq!(map.sources[0].as_deref(), Some("a.js"));
                assert_eq!(map.sources[1], None);
            }
            SourceMap::Index(_) => panic!("expected regular map"),
        }
    }

    #[test]
    fn rejects_missing_version() {
        let json = serde_json::json!({"sources": [], "mappings": ""}).to_string();
        let err = parse_and_validate(&json).unwrap_err();
        assert_eq!(err.code, SourceMapErrorCode::MissingVersion);
    }

    #[test]
    fn rejects_unsupported_version() {
        let json = serde_json::json!({"version": 2, "sources": [], "mappings": ""}).to_string();
        let err = parse_and_validate(&json).unwrap_err();
        assert_eq!(err.code, SourceMapErrorCode::InvalidVersion);
    }

    #[test]
    fn rejects_missing_sources() {
        let json = serde_json::json!({"version": 3, "mappings": ""}).to_string();
        let err = parse_and_validate(&json).unwrap_err();
        assert_eq!(err.code, SourceMapErrorCode::MissingSources);
    }

    #[test]
    fn rejects_mapping_source_index_out_of_bounds() {
        // "ACAA" accumulates a source-index delta of +1 against zero declared sources.
        let json = serde_json::json!({"version": 3, "sources": [], "mappings": "ACAA"}).to_string();
        let err = parse_and_validate(&json).unwrap_err();
        assert_eq!(err.code, SourceMapErrorCode::MappingSourceIndexOutOfBounds);
    }

    #[test]
    fn parses_index_map_with_ordered_sections() {
        let inner = serde_json::json!({
            "version": 3,
            "sources": ["a.js"],
            "mappings": "AAAA"
        });
        let json = serde_json::json!({
            "version": 3,
            "sections": [
                {"offset": {"line": 0, "column": 0}, "map": inner.clone()},
                {"offset": {"line": 1, "column": 0}, "map": inner}
            ]
        })
        .to_string();
        let parsed = parse_and_validate(&json).unwrap();
        match parsed {
            SourceMap::Index(idx) => assert_eq!(idx.sections.len(), 2),
            SourceMap::Regular(_) => panic!("expected index map"),
        }
    }

    #[test]
    fn rejects_sections_whose_extent_overlaps_next_sections_start() {
        // Strictly increasing offsets, but the first section's own mappings
        // span 3 generated lines ("AAAA;AAAA;AAAA" -> lines 0..=2), running
        // past the second section's offset at line 1 — an overlap the raw
        // offset comparison alone would miss.
        let spanning = serde_json::json!({"version": 3, "sources": ["a.js"], "mappings": "AAAA;AAAA;AAAA"});
        let inner = serde_json::json!({"version": 3, "sources": ["b.js"], "mappings": "AAAA"});
        let json = serde_json::json!({
            "version": 3,
            "sections": [
                {"offset": {"line": 0, "column": 0}, "map": spanning},
                {"offset": {"line": 1, "column": 0}, "map": inner}
            ]
        })
        .to_string();
        let err = parse_and_validate(&json).unwrap_err();
        assert_eq!(err.code, SourceMapErrorCode::IndexMapOverlap);
    }

    #[test]
    fn rejects_overlapping_index_sections() {
        let inner = serde_json::json!({"version": 3, "sources": ["a.js"], "mappings": "AAAA"});
        let json = serde_json::json!({
            "version": 3,
            "sections": [
                {"offset": {"line": 1, "column": 0}, "map": inner.clone()},
                {"offset": {"line": 1, "column": 0}, "map": inner}
            ]
        })
        .to_string();
        let err = parse_and_validate(&json).unwrap_err();
        assert_eq!(err.code, SourceMapErrorCode::IndexMapOverlap);
    }

    #[test]
    fn rejects_index_map_with_top_level_mappings() {
        let json = serde_json::json!({
            "version": 3,
            "sections": [],
            "mappings": "AAAA"
        })
        .to_string();
        let err = parse_and_validate(&json).unwrap_err();
        assert_eq!(err.code, SourceMapErrorCode::IndexMapWithMappings);
    }
}
