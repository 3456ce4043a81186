//! Manifest emission (spec §6): the top-level `manifest.json`, the
//! reconstructed `package.json` + version provenance, and the `_server/`
//! tree consumed by the mock API/static server.

pub mod package_json;
pub mod server_manifest;

use std::path::Path;

use serde_json::{json, Value};
use tokio::fs;

use crate::error::Result;
use crate::reconstruct::{aggregate_stats, BundleManifest};

pub use package_json::{build_dependencies, build_package_json, build_provenance, PackageEntry};
pub use server_manifest::{build_fixtures_index, build_server_manifest, ServerOptions, StaticOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Page,
    Direct,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::Page => "page",
            Mode::Direct => "direct",
        }
    }
}

/// Builds the top-level `manifest.json` document (spec §6): extraction
/// timestamp, source URL, mode, per-bundle manifests, total file count, and
/// aggregate extension/directory stats.
pub fn build_top_level_manifest(extracted_at: &str, source_url: &str, mode: Mode, manifests: &[BundleManifest]) -> Value {
    let total_files: usize = manifests.iter().map(|m| m.files.len()).sum();
    let (by_extension, by_directory) = aggregate_stats(manifests);

    let bundles: Vec<Value> = manifests
        .iter()
        .map(|m| {
            json!({
                "bundleUrl": m.bundle_url,
                "mapUrl": m.map_url,
                "files": m.files.iter().map(|f| json!({
                    "path": f.relative_path,
                    "md5": f.md5,
                    "size": f.size,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    json!({
        "extractedAt": extracted_at,
        "sourceUrl": source_url,
        "mode": mode.as_str(),
        "bundles": bundles,
        "totalFiles": total_files,
        "stats": { "byExtension": by_extension, "byDirectory": by_directory },
    })
}

/// Writes `manifest.json` at the output root.
pub async fn write_top_level_manifest(
    output_root: &Path,
    extracted_at: &str,
    source_url: &str,
    mode: Mode,
    manifests: &[BundleManifest],
) -> Result<()> {
    let doc = build_top_level_manifest(extracted_at, source_url, mode, manifests);
    fs::write(output_root.join("manifest.json"), serde_json::to_vec_pretty(&doc)?).await?;
    Ok(())
}

/// Writes the reconstructed `package.json` plus its sibling provenance
/// document (`_versionMeta.json`) at the output root.
pub async fn write_package_json(
    output_root: &Path,
    project_name: &str,
    entries: &[PackageEntry<'_>],
    import_aliases: &std::collections::BTreeMap<String, String>,
    bundler_alias_config: &std::collections::BTreeMap<String, String>,
    notes: &[String],
) -> Result<()> {
    let package = build_package_json(project_name, entries);
    fs::write(output_root.join("package.json"), serde_json::to_vec_pretty(&package)?).await?;

    let provenance = build_provenance(entries, import_aliases, bundler_alias_config, notes);
    fs::write(output_root.join("_versionMeta.json"), serde_json::to_vec_pretty(&provenance)?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconstruct::{WriteOutcome, WriteRecord};

    fn manifest_with(file_count: usize) -> BundleManifest {
        BundleManifest {
            bundle_url: "https://example.com/app.js".to_string(),
            map_url: "https://example.com/app.js.map".to_string(),
            files: (0..file_count)
                .map(|i| WriteRecord {
                    relative_path: format!("src/file{i}.js"),
                    outcome: WriteOutcome::Written,
                    md5: "deadbeef".to_string(),
                    size: 100,
                })
                .collect(),
        }
    }

    #[test]
    fn top_level_manifest_sums_total_files() {
        let manifests = vec![manifest_with(2), manifest_with(3)];
        let doc = build_top_level_manifest("2026-01-01T00:00:00Z", "https://example.com", Mode::Page, &manifests);
        assert_eq!(doc["totalFiles"], json!(5));
        assert_eq!(doc["mode"], json!("page"));
    }
}
