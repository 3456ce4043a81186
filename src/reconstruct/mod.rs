//! Safe filesystem materialisation of extracted source files (C5, spec
//! §4.5): sanitise → hash-compare → atomic write → per-bundle manifest.
//! Invariant I2 (no path ever escapes the output root) is enforced earlier,
//! in `sourcemap::path`; this module's own job is idempotence and
//! never clobbering identical content with a redundant write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{ReconError, Result};
use crate::sourcemap::ExtractedSource;

/// Outcome of writing a single extracted file, used to build the
/// per-bundle manifest and to decide what a re-run would report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    UnchangedSkipped,
    Overwritten,
}

#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub relative_path: String,
    pub outcome: WriteOutcome,
    pub md5: String,
    pub size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BundleManifest {
    pub bundle_url: String,
    pub map_url: String,
    pub files: Vec<WriteRecord>,
}

fn md5_hex(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

/// Derives the per-bundle subdirectory name a bundle's files are contained
/// under (spec §4.5: `outputDir / bundleName / sanitize(path)`), so two
/// bundles can never collide on the same output path even if their source
/// maps happen to share a relative source path. Uses the bundle URL's
/// final path segment, sanitised the same way an individual source path is.
pub fn bundle_dir_name(bundle_url: &str) -> String {
    let path_only = bundle_url.split(['?', '#']).next().unwrap_or(bundle_url);
    let last_segment = path_only.rsplit('/').find(|s| !s.is_empty()).unwrap_or("bundle");
    let sanitized: String = last_segment
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' | '@' => c,
            _ => '_',
        })
        .collect();
    if sanitized.is_empty() {
        "bundle".to_string()
    } else {
        sanitized
    }
}

/// Writes one extracted file under `output_root/bundle_dir/relative_path`,
/// skipping the write if a file already exists at that path with an
/// identical MD5 (the rule that makes a second reconstruction run a no-op,
/// per §4.5's idempotence requirement). Writes happen via a temp file +
/// rename so a crash mid-write never leaves a half-written file behind.
pub async fn write_extracted_file(output_root: &Path, bundle_dir: &str, source: &ExtractedSource) -> Result<WriteRecord> {
    let target = output_root.join(bundle_dir).join(&source.path);
    let new_hash = md5_hex(&source.content);

    if let Ok(existing) = fs::read(&target).await {
        let existing_hash = format!("{:x}", md5::compute(&existing));
        if existing_hash == new_hash && existing.len() == source.content.len() {
            debug!("unchanged, skipping write: {}", source.path);
            return Ok(WriteRecord {
                relative_path: source.path.clone(),
                outcome: WriteOutcome::UnchangedSkipped,
                md5: new_hash,
                size: source.content.len(),
            });
        }
    }

    let existed_before = fs::metadata(&target).await.is_ok();

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp_path = temp_sibling(&target);
    fs::write(&tmp_path, source.content.as_bytes()).await?;
    fs::rename(&tmp_path, &target).await.map_err(|e| {
        ReconError::Config(format!("failed to finalise write of {}: {e}", target.display()))
    })?;

    Ok(WriteRecord {
        relative_path: source.path.clone(),
        outcome: if existed_before { WriteOutcome::Overwritten } else { WriteOutcome::Written },
        md5: new_hash,
        size: source.content.len(),
    })
}

fn temp_sibling(target: &Path) -> PathBuf {
    let file_name = target.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let pid = std::process::id();
    let unique = format!(".{file_name}.{pid}.tmp");
    target.with_file_name(unique)
}

/// Writes every file extracted from one bundle's source map and returns the
/// per-bundle manifest. Individual file failures are logged and recorded as
/// errors in the caller's aggregate report rather than aborting the batch.
pub async fn materialize_bundle(
    output_root: &Path,
    bundle_url: &str,
    map_url: &str,
    files: &[ExtractedSource],
) -> (BundleManifest, Vec<String>) {
    let mut manifest = BundleManifest {
        bundle_url: bundle_url.to_string(),
        map_url: map_url.to_string(),
        files: Vec::with_capacity(files.len()),
    };
    let mut errors = Vec::new();
    let bundle_dir = bundle_dir_name(bundle_url);

    for source in files {
        match write_extracted_file(output_root, &bundle_dir, source).await {
            Ok(record) => manifest.files.push(record),
            Err(e) => {
                warn!("failed to write {}: {e}", source.path);
                errors.push(format!("{}: {e}", source.path));
            }
        }
    }

    (manifest, errors)
}

/// Aggregates per-extension and per-directory file counts across every
/// bundle manifest, feeding the top-level `manifest.json` stats block.
pub fn aggregate_stats(manifests: &[BundleManifest]) -> (BTreeMap<String, usize>, BTreeMap<String, usize>) {
    let mut by_extension: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_directory: BTreeMap<String, usize> = BTreeMap::new();

    for manifest in manifests {
        for record in &manifest.files {
            let path = Path::new(&record.relative_path);
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("(none)")
                .to_string();
            *by_extension.entry(ext).or_insert(0) += 1;

            let dir = path
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "(root)".to_string());
            *by_directory.entry(dir).or_insert(0) += 1;
        }
    }

    (by_extension, by_directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_like::TempDir;

    /// Minimal self-contained temp-dir helper so this test module does not
    /// need an extra dev-dependency just for a handful of filesystem tests.
    mod tempfile_like {
        use std::path::PathBuf;

        pub struct TempDir(pub PathBuf);

        impl TempDir {
            pub fn new() -> Self {
                let dir = std::env::temp_dir().join(format!("sitesource-test-{}-{}", std::process::id(), rand_suffix()));
                std::fs::create_dir_all(&dir).unwrap();
                Self(dir)
            }

            pub fn path(&self) -> &std::path::Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }

        fn rand_suffix() -> u64 {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64
        }
    }

    #[tokio::test]
    async fn writes_new_file() {
        let dir = TempDir::new();
        let source = ExtractedSource {
            path: "src/a.js".to_string(),
            content: "console.log(1)".to_string(),
            original_path: None,
        };
        let record = write_extracted_file(dir.path(), "app-bundle", &source).await.unwrap();
        assert_eq!(record.outcome, WriteOutcome::Written);
        let on_disk = std::fs::read_to_string(dir.path().join("app-bundle/src/a.js")).unwrap();
        assert_eq!(on_disk, "console.log(1)");
    }

    #[tokio::test]
    async fn second_identical_write_is_skipped() {
        let dir = TempDir::new();
        let source = ExtractedSource {
            path: "src/a.js".to_string(),
            content: "console.log(1)".to_string(),
            original_path: None,
        };
        write_extracted_file(dir.path(), "app-bundle", &source).await.unwrap();
        let second = write_extracted_file(dir.path(), "app-bundle", &source).await.unwrap();
        assert_eq!(second.outcome, WriteOutcome::UnchangedSkipped);
    }

    #[tokio::test]
    async fn changed_content_overwrites() {
        let dir = TempDir::new();
        let mut source = ExtractedSource {
            path: "src/a.js".to_string(),
            content: "v1".to_string(),
            original_path: None,
        };
        write_extracted_file(dir.path(), "app-bundle", &source).await.unwrap();
        source.content = "v2".to_string();
        let second = write_extracted_file(dir.path(), "app-bundle", &source).await.unwrap();
        assert_eq!(second.outcome, WriteOutcome::Overwritten);
        let on_disk = std::fs::read_to_string(dir.path().join("app-bundle/src/a.js")).unwrap();
        assert_eq!(on_disk, "v2");
    }

    #[tokio::test]
    async fn two_bundles_sharing_a_relative_path_do_not_collide() {
        let dir = TempDir::new();
        let source = ExtractedSource {
            path: "src/index.js".to_string(),
            content: "console.log('a')".to_string(),
            original_path: None,
        };
        let (manifest_a, errors_a) =
            materialize_bundle(dir.path(), "https://example.com/assets/app-a.js", "https://example.com/assets/app-a.js.map", &[source.clone()])
                .await;
        let mut source_b = source;
        source_b.content = "console.log('b')".to_string();
        let (manifest_b, errors_b) =
            materialize_bundle(dir.path(), "https://example.com/assets/app-b.js", "https://example.com/assets/app-b.js.map", &[source_b])
                .await;

        assert!(errors_a.is_empty() && errors_b.is_empty());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app-a.js/src/index.js")).unwrap(),
            "console.log('a')"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app-b.js/src/index.js")).unwrap(),
            "console.log('b')"
        );
        assert_eq!(manifest_a.files[0].relative_path, "src/index.js");
        assert_eq!(manifest_b.files[0].relative_path, "src/index.js");
    }

    #[test]
    fn bundle_dir_name_sanitizes_and_falls_back() {
        assert_eq!(bundle_dir_name("https://example.com/assets/app-abc123.js"), "app-abc123.js");
        assert_eq!(bundle_dir_name("https://example.com/"), "bundle");
        assert_eq!(bundle_dir_name("https://example.com/a b:c.js"), "a_b_c.js");
    }
}
