//! Base64-VLQ decoding for the `mappings` field (ECMA-426 §3.2).
//!
//! Each segment is 1, 4 or 5 fields; each field is a signed value encoded as
//! a sequence of base64 digits, 5 continuation bits + 1 sign bit per digit,
//! little-endian. We bounds-check every decoded value against i32 range and
//! surface distinct error codes per spec §4.4 step 5 rather than panicking
//! or silently wrapping.

use crate::error::{SourceMapError, SourceMapErrorCode};

const BASE64_CHARS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_digit(c: u8) -> Option<i64> {
    BASE64_CHARS.as_bytes().iter().position(|&b| b == c).map(|p| p as i64)
}

const CONTINUATION_BIT: i64 = 0b10_0000;
const DATA_MASK: i64 = 0b01_1111;

/// Decodes one VLQ-encoded signed value starting at `pos` in `chars`.
/// Returns the value and the index just past the consumed digits.
fn decode_vlq_value(chars: &[u8], pos: usize) -> Result<(i64, usize), SourceMapError> {
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    let mut idx = pos;

    loop {
        if idx >= chars.len() {
            return Err(SourceMapError::new(
                SourceMapErrorCode::InvalidVlq,
                "unterminated VLQ sequence",
            ));
        }
        let digit = base64_digit(chars[idx]).ok_or_else(|| {
            SourceMapError::new(SourceMapErrorCode::InvalidVlq, "invalid base64 digit in mappings")
        })?;
        idx += 1;

        let has_continuation = digit & CONTINUATION_BIT != 0;
        let digit_value = digit & DATA_MASK;

        if shift >= 32 || (digit_value << shift) >> shift != digit_value {
            return Err(SourceMapError::new(
                SourceMapErrorCode::MappingValueExceeds32Bits,
                "VLQ value exceeds 32-bit range",
            ));
        }
        result += digit_value << shift;
        shift += 5;

        if !has_continuation {
            break;
        }
    }

    let negative = result & 1 != 0;
    let mut value = result >> 1;
    if negative {
        value = -value;
    }

    if value > i32::MAX as i64 || value < i32::MIN as i64 {
        return Err(SourceMapError::new(
            SourceMapErrorCode::MappingValueExceeds32Bits,
            "decoded VLQ value exceeds 32-bit signed range",
        ));
    }

    Ok((value, idx))
}

/// One generated line's worth of decoded segments (comma-separated group
/// between two `;` delimiters in `mappings`).
pub fn decode_line(segment_group: &str) -> Result<Vec<[i64; 5]>, SourceMapError> {
    let mut segments = Vec::new();
    if segment_group.is_empty() {
        return Ok(segments);
    }

    for raw_segment in segment_group.split(',') {
        if raw_segment.is_empty() {
            continue;
        }
        let bytes = raw_segment.as_bytes();
        let mut fields = [0i64; 5];
        let mut present = 0usize;
        let mut pos = 0usize;

        while pos < bytes.len() && present < 5 {
            let (value, next) = decode_vlq_value(bytes, pos)?;
            fields[present] = value;
            present += 1;
            pos = next;
        }

        if pos != bytes.len() {
            return Err(SourceMapError::new(
                SourceMapErrorCode::InvalidMappingSegment,
                "trailing data after fifth VLQ field in mapping segment",
            ));
        }
        if present != 1 && present != 4 && present != 5 {
            return Err(SourceMapError::new(
                SourceMapErrorCode::InvalidMappingSegment,
                format!("mapping segment has {present} fields, expected 1, 4 or 5"),
            ));
        }

        // fields[0..present] are deltas; encode "absent" fields as i64::MIN sentinel.
        let mut out = [i64::MIN; 5];
        out[..present].copy_from_slice(&fields[..present]);
        segments.push(out);
    }

    Ok(segments)
}

/// Decodes the full `mappings` string into per-line delta-encoded segments.
/// Deltas are NOT yet accumulated into absolute positions — that happens in
/// `parser.rs` where source/name counts are known for bounds checks.
pub fn decode_mappings(mappings: &str) -> Result<Vec<Vec<[i64; 5]>>, SourceMapError> {
    mappings.split(';').map(decode_line).collect()
}

/// Validates the full `mappings` string against the source/name counts a
/// regular map declares (spec §4.4 step 5): every segment's field count and
/// per-field 32-bit range are already enforced by `decode_line`; this layers
/// the cumulative checks that need those counts — accumulated source/name
/// indices never go negative and never run past `num_sources`/`num_names`.
/// Source index, original line/column and name index accumulate across the
/// *entire* mappings string (ECMA-426); only the generated column resets
/// per line. Returns the first violation found, located at its 0-indexed
/// generated line/segment-within-line.
pub fn validate_mapping_bounds(mappings: &str, num_sources: usize, num_names: usize) -> Result<(), SourceMapError> {
    let mut source_index: i64 = 0;
    let mut orig_line: i64 = 0;
    let mut orig_column: i64 = 0;
    let mut name_index: i64 = 0;

    for (line_no, segment_group) in mappings.split(';').enumerate() {
        let segments = decode_line(segment_group).map_err(|e| e.at_location(line_no, 0))?;
        for (col_no, seg) in segments.iter().enumerate() {
            let has_source_fields = seg[1] != i64::MIN;
            let has_name_field = seg[4] != i64::MIN;

            if has_source_fields {
                source_index += seg[1];
                orig_line += seg[2];
                orig_column += seg[3];
                if source_index < 0 || orig_line < 0 || orig_column < 0 {
                    return Err(SourceMapError::new(
                        SourceMapErrorCode::MappingNegativeValue,
                        "accumulated mapping position went negative",
                    )
                    .at_location(line_no, col_no));
                }
                if source_index as usize >= num_sources {
                    return Err(SourceMapError::new(
                        SourceMapErrorCode::MappingSourceIndexOutOfBounds,
                        format!("source index {source_index} out of bounds for {num_sources} sources"),
                    )
                    .at_location(line_no, col_no));
                }
            }

            if has_name_field {
                name_index += seg[4];
                if name_index < 0 {
                    return Err(SourceMapError::new(
                        SourceMapErrorCode::MappingNegativeValue,
                        "accumulated name index went negative",
                    )
                    .at_location(line_no, col_no));
                }
                if name_index as usize >= num_names {
                    return Err(SourceMapError::new(
                        SourceMapErrorCode::MappingNameIndexOutOfBounds,
                        format!("name index {name_index} out of bounds for {num_names} names"),
                    )
                    .at_location(line_no, col_no));
                }
            }
        }
    }

    Ok(())
}

/// Computes the generated-position extent a regular map's `mappings`
/// spans, relative to its own origin (generated line 0, column 0): the
/// zero-indexed final generated line it reaches, and the accumulated
/// generated column on that final line. Used by index-map validation
/// (spec §4.4 step 6) to check section overlap against the *actual*
/// generated range an inner map implies, not just its declared `offset`.
pub fn generated_extent(mappings: &str) -> Result<(u64, i64), SourceMapError> {
    let groups: Vec<&str> = mappings.split(';').collect();
    let last_line_index = groups.len().saturating_sub(1) as u64;
    let mut last_column = 0i64;
    if let Some(last_group) = groups.last() {
        for seg in decode_line(last_group)? {
            last_column += seg[0];
        }
    }
    Ok((last_line_index, last_column.max(0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_segment() {
        // "AAAA" => four zero deltas: generated_column=0, source=0, line=0, col=0
        let lines = decode_mappings("AAAA").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 1);
        assert_eq!(lines[0][0][0], 0);
    }

    #[test]
    fn decodes_negative_value() {
        // "D" decodes to -1 (continuation bit clear, data=00010, sign bit set)
        let (value, consumed) = decode_vlq_value(b"D", 0).unwrap();
        assert_eq!(value, -1);
        assert_eq!(consumed, 1);
    }

    #[test]
    fn rejects_invalid_digit() {
        let err = decode_vlq_value(b"!", 0).unwrap_err();
        assert_eq!(err.code, SourceMapErrorCode::InvalidVlq);
    }

    #[test]
    fn rejects_wrong_field_count() {
        // "AA" decodes to two single-digit fields => 2 present, invalid count
        let err = decode_line("AA").unwrap_err();
        assert_eq!(err.code, SourceMapErrorCode::InvalidMappingSegment);
    }

    #[test]
    fn empty_lines_are_allowed() {
        let lines = decode_mappings(";;AAAA;;").unwrap();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].is_empty());
        assert_eq!(lines[2].len(), 1);
    }

    #[test]
    fn validates_source_index_in_bounds() {
        // "AAAA" => source index delta 0, one source declared: in bounds.
        assert!(validate_mapping_bounds("AAAA", 1, 0).is_ok());
    }

    #[test]
    fn rejects_source_index_out_of_bounds() {
        // "ACAA": generatedCol=0, source delta='C'=+1, origLine=0, origCol=0.
        // Accumulated source index becomes 1, out of bounds for 0 declared sources.
        let err = validate_mapping_bounds("ACAA", 0, 0).unwrap_err();
        assert_eq!(err.code, SourceMapErrorCode::MappingSourceIndexOutOfBounds);
    }

    #[test]
    fn rejects_name_index_out_of_bounds() {
        // Five-field segment: name delta='C'=+1, but zero names declared.
        let err = validate_mapping_bounds("AAAAC", 1, 0).unwrap_err();
        assert_eq!(err.code, SourceMapErrorCode::MappingNameIndexOutOfBounds);
    }

    #[test]
    fn accumulates_source_index_across_segments_on_same_line() {
        // Two segments each with source delta +1: accumulated index reaches 2
        // by the second segment, so 3 declared sources is required to pass.
        assert!(validate_mapping_bounds("ACAA,ACAA", 3, 0).is_ok());
        let err = validate_mapping_bounds("ACAA,ACAA", 2, 0).unwrap_err();
        assert_eq!(err.code, SourceMapErrorCode::MappingSourceIndexOutOfBounds);
    }

    #[test]
    fn generated_extent_counts_lines_and_final_column() {
        // Three generated lines ("AAAA" x3 joined by ';'), each segment's
        // generated-column delta is 0, so the extent is (line 2, column 0).
        assert_eq!(generated_extent("AAAA;AAAA;AAAA").unwrap(), (2, 0));
    }

    #[test]
    fn generated_extent_single_line_sums_column_deltas() {
        // Single generated line, two segments each advancing the generated
        // column by some positive delta: extent column is their sum.
        let (line, column) = generated_extent("AAAA,CAAA").unwrap();
        assert_eq!(line, 0);
        assert!(column > 0);
    }
}
