//! Shared data-model types used across subsystems (spec §3).

use serde::{Deserialize, Serialize};

/// A discovered script or stylesheet bundle, in document order, immutable
/// once constructed by C6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleRef {
    pub url: String,
    pub kind: BundleKind,
    pub source_map_url: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    Script,
    Stylesheet,
}

/// A redirect observed while resolving a requested URL to its final
/// response URL, recorded only when requested and final share an origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectEdge {
    pub from: String,
    pub to: String,
    pub status: u16,
}

/// Ordinal confidence of a version/package attribution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Unverified,
    Low,
    Medium,
    High,
    Exact,
}

/// How a version was attributed to a package (spec §3 VersionResult).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum VersionSource {
    LockfilePath,
    SourcemapPath,
    Banner,
    VersionConstant,
    CustomBuild,
    Fingerprint,
    FingerprintMinified,
    PeerDep,
    NpmLatest,
    PackageJson,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResult {
    pub version: String,
    pub confidence: Confidence,
    pub source: VersionSource,
}

/// A package name and the set of extracted-source files attributed to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageFiles {
    pub name: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    Json,
    Text,
    Binary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: String,
    pub url: String,
    pub path: String,
    pub pattern: String,
    pub path_params: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub body_type: BodyType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFixtureMetadata {
    pub captured_at: String,
    pub response_time_ms: u64,
    pub source_page_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFixture {
    pub id: String,
    pub request: ApiRequest,
    pub response: ApiResponse,
    pub metadata: ApiFixtureMetadata,
    /// Higher priority = more literal path segments = matched first by the
    /// mock server's route table.
    pub priority: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedAsset {
    pub url: String,
    pub local_path: String,
    pub content_type: Option<String>,
    pub size: usize,
    pub is_entrypoint: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CrawlItem {
    pub url: String,
    pub depth: u32,
}
