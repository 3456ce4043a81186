//! Source path normalisation and traversal safety (spec §4.4/§4.5, invariant
//! I2: every extracted file path stays within the output directory).

const WEBPACK_SCHEMES: &[&str] = &["webpack://", "webpack-internal://"];

/// Joins a `sourceRoot` (if any) with a raw `sources[i]` entry the way
/// ECMA-426 §3.1 specifies: simple concatenation, not URL resolution,
/// except that a trailing `/` on sourceRoot is not duplicated. Spec §4.4:
/// only prepend when `sourceRoot` itself does not already start with `/`
/// or `.` — a root like `./` or `/x` is left for the caller's own
/// normalisation instead of being concatenated.
pub fn join_source_root(source_root: Option<&str>, raw_source: &str) -> String {
    match source_root {
        Some(root) if !root.is_empty() && !root.starts_with('/') && !root.starts_with('.') => {
            if raw_source.starts_with('/') || raw_source.starts_with("http://") || raw_source.starts_with("https://") {
                raw_source.to_string()
            } else if root.ends_with('/') {
                format!("{root}{raw_source}")
            } else {
                format!("{root}/{raw_source}")
            }
        }
        _ => raw_source.to_string(),
    }
}

/// Strips a `webpack://`/`webpack-internal://` scheme prefix *and* the
/// `<project>` namespace segment that follows it up to (and including) the
/// next `/` — spec §4.4: "strip `webpack://<project>/` prefix" — so
/// `webpack://app/./src/util.ts` reduces to `./src/util.ts`, not
/// `app/./src/util.ts`. The triple-slash/empty-namespace case
/// (`webpack:///./src/index.js`) already has an empty namespace segment and
/// collapses the same way. Also strips a leading `./` and collapses `\` to
/// `/`.
fn strip_bundler_prefixes(path: &str) -> String {
    let mut p = path.replace('\\', "/");
    for scheme in WEBPACK_SCHEMES {
        if let Some(rest) = p.strip_prefix(scheme) {
            // `rest` is `<namespace>/<path...>` (namespace may be empty).
            // Drop everything up to and including the first `/`.
            p = match rest.find('/') {
                Some(idx) => rest[idx + 1..].to_string(),
                None => rest.to_string(),
            };
            break;
        }
    }
    if let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }
    p
}

/// Removes any leading scheme (`http://host/...` -> `host/...`) so absolute
/// URLs used as source entries still land under the output directory.
fn strip_scheme(path: &str) -> String {
    if let Some(idx) = path.find("://") {
        let (scheme, rest) = path.split_at(idx);
        if scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.') {
            return rest.trim_start_matches("://").to_string();
        }
    }
    path.to_string()
}

/// Replaces characters invalid in portable filenames with `_`. Keeps `/` as
/// the path separator; everything else outside a small allow-list is
/// escaped, matching the teacher's conservative sanitisation style.
fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' | ' ' | '@' => c,
            _ => '_',
        })
        .collect()
}

/// Query-string/build-tool sentinels that invalidate a source entry outright
/// rather than being sanitised away (spec §4.4 path normalisation: "reject
/// paths containing null bytes, `data:`, `(webpack)/`, `__vite`, `?`
/// query-string sentinels").
fn has_rejected_sentinel(raw: &str) -> bool {
    raw.contains('\0')
        || raw.contains("data:")
        || raw.contains("(webpack)/")
        || raw.contains("__vite")
        || raw.contains('?')
}

/// Strips the leading null-byte sentinel some bundlers (esbuild, rollup)
/// emit before a synthetic module path, e.g. `"\0synthetic:foo"`.
fn strip_null_byte_prefix(path: &str) -> &str {
    path.strip_prefix('\0').unwrap_or(path)
}

/// Collapses `.` and `..` segments, refusing to let `..` escape above the
/// root. Returns `None` if the path cannot be made safe (e.g. it is only
/// `..` segments, or it carries a rejected sentinel), which callers must
/// treat as a skip, never a panic.
pub fn normalize_and_contain(raw: &str) -> Option<String> {
    let without_null = strip_null_byte_prefix(raw);
    if has_rejected_sentinel(without_null) {
        return None;
    }
    let stripped = strip_scheme(&strip_bundler_prefixes(without_null));
    let trimmed = stripped.trim_start_matches('/');

    let mut out: Vec<String> = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if out.is_empty() {
                    // Spec §4.4 says an unresolvable `..` "stays as literal
                    // `..`", but invariant I2 is stricter — the resolved
                    // path must never escape the output root — so we drop
                    // the component instead of keeping a literal `..` that
                    // could climb above it once joined to the bundle dir.
                    continue;
                }
                out.pop();
            }
            other => out.push(sanitize_segment(other)),
        }
    }

    if out.is_empty() {
        return None;
    }
    Some(out.join("/"))
}

/// Full pipeline: join sourceRoot, then normalize+sanitize+contain.
pub fn resolve_source_path(source_root: Option<&str>, raw_source: &str) -> Option<String> {
    let joined = join_source_root(source_root, raw_source);
    normalize_and_contain(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_webpack_prefix() {
        assert_eq!(
            resolve_source_path(None, "webpack:///./src/index.js").unwrap(),
            "src/index.js"
        );
    }

    #[test]
    fn strips_webpack_prefix_with_project_namespace() {
        // Spec §8 scenario 1: `webpack://app/./src/util.ts` -> `src/util.ts`,
        // not `app/src/util.ts`.
        assert_eq!(
            resolve_source_path(None, "webpack://app/./src/util.ts").unwrap(),
            "src/util.ts"
        );
    }

    #[test]
    fn source_root_starting_with_dot_is_not_concatenated() {
        // Spec §4.4: only prepend sourceRoot when it does not itself start
        // with `/` or `.`.
        assert_eq!(join_source_root(Some("./"), "src/a.js"), "src/a.js");
        assert_eq!(join_source_root(Some("/abs"), "src/a.js"), "src/a.js");
    }

    #[test]
    fn joins_source_root() {
        assert_eq!(
            resolve_source_path(Some("src"), "index.js").unwrap(),
            "src/index.js"
        );
    }

    #[test]
    fn rejects_traversal_above_root() {
        assert_eq!(normalize_and_contain("../../etc/passwd").unwrap(), "etc/passwd");
        assert_eq!(normalize_and_contain("../..").is_none(), true);
    }

    #[test]
    fn sanitizes_unsafe_characters() {
        assert_eq!(normalize_and_contain("a:b*c.js").unwrap(), "a_b_c.js");
    }

    #[test]
    fn rejects_query_string_sentinel() {
        assert!(normalize_and_contain("src/index.ts?t=1700000000000").is_none());
    }

    #[test]
    fn strips_leading_null_byte_sentinel() {
        assert_eq!(normalize_and_contain("\0<stdin>").unwrap(), "_stdin_");
    }

    #[test]
    fn rejects_vite_internal_sentinel() {
        assert!(normalize_and_contain("src/__vite-browser-external").is_none());
    }

    #[test]
    fn rejects_webpack_parenthetical_marker() {
        assert!(normalize_and_contain("(webpack)/buildin/module.js").is_none());
    }

    #[test]
    fn strips_absolute_url_scheme() {
        assert_eq!(
            normalize_and_contain("https://cdn.example.com/lib/foo.js").unwrap(),
            "cdn.example.com/lib/foo.js"
        );
    }
}
