//! Confidence-ranked package version attribution (C7, spec §4.7):
//! lockfile-path > sourcemap-path > custom-build/header > version-constant,
//! with false-positive guards against URLs, query strings, data URIs and
//! JSDoc comments that merely *mention* a version number.

use regex::Regex;

use crate::types::{Confidence, VersionResult, VersionSource};

/// `node_modules/<pkg>/package.json`-shaped lockfile entries, and npm/yarn
/// lockfile `"<pkg>@<version>"` resolved-specifier keys.
fn lockfile_path_regex() -> Regex {
    Regex::new(r#"(?:^|[\s"'])((?:@[a-zA-Z0-9._-]+/)?[a-zA-Z0-9._-]+)@(\d+\.\d+\.\d+(?:[-+][\w.]+)?)(?:[\s"':,]|$)"#)
        .expect("static regex is valid")
}

/// webpack/source-map style `node_modules/<pkg>@<version>/...` paths (not
/// shaped like a package manager's own content-addressed cache directory —
/// those are `lockfile_shaped_path_regexes` below, one tier more confident).
fn sourcemap_path_regex() -> Regex {
    Regex::new(r#"node_modules/(@[a-zA-Z0-9._-]+/[a-zA-Z0-9._-]+|[a-zA-Z0-9._-]+)@(\d+\.\d+\.\d+(?:[-+][\w.]+)?)"#)
        .expect("static regex is valid")
}

/// §4.7 strategy 1's four lockfile-shaped path patterns, matched against an
/// extracted file's own path (not a separate lockfile file's text): pnpm's
/// `.pnpm` store, yarn-berry's `.yarn/cache` zip names, yarn-classic's
/// `node_modules/<name>/<version>/` layout, and a webpack bundle URL that
/// still carries the `node_modules/<name>@<version>/` segment. Each capture
/// group pair is (package name, version).
fn lockfile_shaped_path_regexes() -> [Regex; 4] {
    [
        // pnpm: node_modules/.pnpm/<name>@<version>[_<hash>]/...
        Regex::new(r#"node_modules/\.pnpm/((?:@[a-zA-Z0-9._-]+\+)?[a-zA-Z0-9._-]+)@(\d+\.\d+\.\d+(?:[-+][\w.]+)?)(?:_[\w.]+)?/"#)
            .expect("static regex is valid"),
        // yarn-berry: .yarn/cache/<name>-npm-<version>-<hash>.zip
        Regex::new(r#"\.yarn/cache/([a-zA-Z0-9._-]+)-npm-(\d+\.\d+\.\d+(?:[-+][\w.]+)?)-[0-9a-f]+\.zip"#)
            .expect("static regex is valid"),
        // yarn-classic: node_modules/<name>/<version>/...
        Regex::new(r#"node_modules/((?:@[a-zA-Z0-9._-]+/)?[a-zA-Z0-9._-]+)/(\d+\.\d+\.\d+(?:[-+][\w.]+)?)/"#)
            .expect("static regex is valid"),
        // webpack URL: webpack://.../node_modules/<name>@<version>/...
        Regex::new(r#"webpack://[^\s"']*/node_modules/((?:@[a-zA-Z0-9._-]+/)?[a-zA-Z0-9._-]+)@(\d+\.\d+\.\d+(?:[-+][\w.]+)?)/"#)
            .expect("static regex is valid"),
    ]
}

/// In-bundle version constants: `VERSION = "1.2.3"`, `version: "1.2.3"`,
/// `/* @license Package v1.2.3 */`-style banners excluded by
/// `is_likely_false_positive` below.
fn version_constant_regex() -> Regex {
    Regex::new(r#"(?i)\bversion\b\s*[:=]\s*["'](\d+\.\d+\.\d+(?:[-+][\w.]+)?)["']"#).expect("static regex is valid")
}

/// Custom-build banners some bundlers emit, e.g. `/*! my-lib v1.2.3 */` or
/// an `X-Package-Version` style response header value handed in directly.
fn custom_build_regex() -> Regex {
    Regex::new(r#"(?i)([a-zA-Z][a-zA-Z0-9._-]*)\s+v(\d+\.\d+\.\d+(?:[-+][\w.]+)?)"#).expect("static regex is valid")
}

/// Guards against matching a version-shaped substring that is actually part
/// of a URL, a query string, a data URI, or a JSDoc `@since`/`@version` tag
/// referencing an unrelated API version.
fn is_likely_false_positive(context: &str, match_start: usize) -> bool {
    // Bound the lookback at the nearest statement/comment boundary so a URL
    // sitting in an *earlier, already-closed* comment doesn't leak into the
    // context of a later, unrelated match (e.g. a banner comment followed by
    // a genuine `export const VERSION = '...'`).
    let search_from = match_start.saturating_sub(60);
    let bounded = context[search_from..match_start.min(context.len())]
        .rfind("*/")
        .map(|p| search_from + p + 2)
        .or_else(|| context[search_from..match_start.min(context.len())].rfind(['\n', ';']).map(|p| search_from + p + 1))
        .unwrap_or(search_from);
    let window = &context[bounded..match_start.min(context.len())];

    if window.contains("http://") || window.contains("https://") || window.contains("://") {
        return true;
    }
    if window.contains('?') && !window.contains('"') {
        return true;
    }
    if window.contains("data:") {
        return true;
    }
    if window.trim_end().ends_with("@since") || window.contains("@version") && window.contains("/**") {
        return true;
    }
    false
}

/// Extracts the first non-false-positive match for a given pattern+group
/// convention, returning the matched name (if the pattern captures one) and
/// version plus the match's byte offset for FP-guard evaluation.
fn first_valid_match(re: &Regex, haystack: &str) -> Option<(Option<String>, String, usize)> {
    for caps in re.captures_iter(haystack) {
        let whole = caps.get(0)?;
        if is_likely_false_positive(haystack, whole.start()) {
            continue;
        }
        let groups: Vec<_> = (1..=2).filter_map(|i| caps.get(i)).collect();
        if groups.len() == 2 {
            return Some((Some(groups[0].as_str().to_string()), groups[1].as_str().to_string(), whole.start()));
        }
        if groups.len() == 1 {
            return Some((None, groups[0].as_str().to_string(), whole.start()));
        }
    }
    None
}

#[derive(Debug, Clone, Default)]
pub struct VersionDetectionOptions {
    /// Banner detection (a package's own `console.log`/comment self-report
    /// of its version) is disabled by default — spec §4.7 flags it as the
    /// least trustworthy source, prone to matching unrelated libraries
    /// bundled alongside the target package.
    pub enable_banner_detection: bool,
}

/// Runs the full confidence-ranked pipeline against every available signal
/// for one package, returning the highest-priority hit.
pub fn detect_version(
    package_name: &str,
    lockfile_text: Option<&str>,
    sourcemap_paths: &[String],
    bundle_content: Option<&str>,
    custom_build_header: Option<&str>,
    options: &VersionDetectionOptions,
) -> Option<VersionResult> {
    if let Some(lockfile) = lockfile_text {
        let re = lockfile_path_regex();
        for caps in re.captures_iter(lockfile) {
            if caps.get(1).map(|m| m.as_str()) == Some(package_name) {
                if is_likely_false_positive(lockfile, caps.get(0).unwrap().start()) {
                    continue;
                }
                return Some(VersionResult {
                    version: caps[2].to_string(),
                    confidence: Confidence::Exact,
                    source: VersionSource::LockfilePath,
                });
            }
        }
    }

    for re in lockfile_shaped_path_regexes() {
        for path in sourcemap_paths {
            if let Some(caps) = re.captures(path) {
                if &caps[1] == package_name {
                    return Some(VersionResult {
                        version: caps[2].to_string(),
                        confidence: Confidence::Exact,
                        source: VersionSource::LockfilePath,
                    });
                }
            }
        }
    }

    let sm_re = sourcemap_path_regex();
    for path in sourcemap_paths {
        if let Some(caps) = sm_re.captures(path) {
            if &caps[1] == package_name {
                return Some(VersionResult {
                    version: caps[2].to_string(),
                    confidence: Confidence::High,
                    source: VersionSource::SourcemapPath,
                });
            }
        }
    }

    if let Some(header) = custom_build_header {
        if let Some((name, version, _)) = first_valid_match(&custom_build_regex(), header) {
            if name.as_deref().map(|n| n.eq_ignore_ascii_case(package_name)).unwrap_or(true) {
                return Some(VersionResult {
                    version,
                    confidence: Confidence::Medium,
                    source: VersionSource::CustomBuild,
                });
            }
        }
    }

    if let Some(content) = bundle_content {
        if options.enable_banner_detection {
            if let Some((name, version, _)) = first_valid_match(&custom_build_regex(), content) {
                if name.as_deref().map(|n| n.eq_ignore_ascii_case(package_name)).unwrap_or(false) {
                    return Some(VersionResult {
                        version,
                        confidence: Confidence::Low,
                        source: VersionSource::Banner,
                    });
                }
            }
        }

        if let Some((_, version, _)) = first_valid_match(&version_constant_regex(), content) {
            return Some(VersionResult {
                version,
                confidence: Confidence::Low,
                source: VersionSource::VersionConstant,
            });
        }
    }

    None
}
