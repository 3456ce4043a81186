//! Dependency detection phase (C7 tie-in, spec §4.12): groups extracted
//! source files by the npm package they came from and runs the
//! confidence-ranked version detector (`version::detect_version`) over
//! each group.

use std::collections::BTreeMap;

use regex::Regex;

use crate::manifest::PackageEntry;
use crate::types::{PackageFiles, VersionResult};
use crate::version::{detect_version, VersionDetectionOptions};

fn node_modules_package_regex() -> Regex {
    Regex::new(r#"node_modules/(@[a-zA-Z0-9._-]+/[a-zA-Z0-9._-]+|[a-zA-Z0-9._-]+)/"#).expect("static regex is valid")
}

/// Groups extracted file paths by the `node_modules/<pkg>/` prefix they
/// fall under. Files outside `node_modules` are the app's own source and
/// never become a dependency entry.
pub fn group_by_package(extracted_paths: &[String]) -> Vec<PackageFiles> {
    let re = node_modules_package_regex();
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for path in extracted_paths {
        if let Some(caps) = re.captures(path) {
            groups.entry(caps[1].to_string()).or_default().push(path.clone());
        }
    }

    groups.into_iter().map(|(name, files)| PackageFiles { name, files }).collect()
}

/// Runs `detect_version` for every grouped package against whatever
/// lockfile text and sourcemap paths are available, returning the owned
/// `VersionResult`s keyed by package name (so callers can build
/// `PackageEntry` borrows against a stable map).
pub fn detect_versions(
    groups: &[PackageFiles],
    lockfile_text: Option<&str>,
    options: &VersionDetectionOptions,
) -> BTreeMap<String, VersionResult> {
    let mut results = BTreeMap::new();
    for group in groups {
        let sourcemap_paths = &group.files;
        if let Some(result) = detect_version(&group.name, lockfile_text, sourcemap_paths, None, None, options) {
            results.insert(group.name.clone(), result);
        }
    }
    results
}

/// Builds the `PackageEntry` list the manifest module needs, borrowing
/// `groups` and `versions` for the duration of the call.
pub fn build_package_entries<'a>(
    groups: &'a [PackageFiles],
    versions: &'a BTreeMap<String, VersionResult>,
    workspace_internal_names: &[String],
) -> Vec<PackageEntry<'a>> {
    groups
        .iter()
        .map(|files| PackageEntry {
            files,
            version: versions.get(&files.name),
            is_workspace_internal: workspace_internal_names.iter().any(|n| n == &files.name),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_files_by_package_prefix() {
        let paths = vec![
            "node_modules/react/index.js".to_string(),
            "node_modules/react/cjs/react.development.js".to_string(),
            "node_modules/@scope/pkg/dist/index.js".to_string(),
            "src/app.js".to_string(),
        ];
        let groups = group_by_package(&paths);
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["@scope/pkg", "react"]);
        assert_eq!(groups.iter().find(|g| g.name == "react").unwrap().files.len(), 2);
    }

    #[test]
    fn detects_version_from_sourcemap_paths() {
        let groups = vec![PackageFiles {
            name: "lodash".to_string(),
            files: vec!["node_modules/lodash@4.17.21/index.js".to_string()],
        }];
        let versions = detect_versions(&groups, None, &VersionDetectionOptions::default());
        assert_eq!(versions.get("lodash").map(|v| v.version.as_str()), Some("4.17.21"));
    }
}
