//! Top-level error type and the source-map error taxonomy.

use std::fmt;
use thiserror::Error;

/// Errors that can occur anywhere in the reconstruction pipeline.
#[derive(Error, Debug)]
pub enum ReconError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    SourceMap(#[from] SourceMapError),

    #[error("WAL error: {0}")]
    Wal(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ReconError>;

/// A diagnostic hint attached to a failed fetch, used to steer a human
/// reader toward the likely root cause without re-parsing the error chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchHint {
    Dns,
    Cert,
    Refused,
    Timeout,
    Reset,
    Unknown,
}

impl fmt::Display for FetchHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchHint::Dns => "DNS resolution failed",
            FetchHint::Cert => "TLS certificate error",
            FetchHint::Refused => "connection refused",
            FetchHint::Timeout => "request timed out",
            FetchHint::Reset => "connection reset",
            FetchHint::Unknown => "unknown network error",
        };
        f.write_str(s)
    }
}

/// Structured error produced by the HTTP client (C1), preserving the cause
/// chain and classifying transience so callers can decide whether to retry.
#[derive(Error, Debug)]
#[error("fetch failed for {url}: {message}{}", .hint.map(|h| format!(" ({h})")).unwrap_or_default())]
pub struct FetchError {
    pub url: String,
    pub message: String,
    pub hint: Option<FetchHint>,
    pub transient: bool,
    #[source]
    pub cause: Option<reqwest::Error>,
}

impl FetchError {
    pub fn classify(url: &str, cause: reqwest::Error) -> Self {
        let message = cause.to_string();
        let transient = is_transient_message(&message) || cause.is_timeout() || cause.is_connect();
        let hint = if cause.is_timeout() {
            Some(FetchHint::Timeout)
        } else if message.contains("certificate") || message.contains("SSL") || message.contains("TLS") {
            Some(FetchHint::Cert)
        } else if message.contains("dns") || message.contains("DNS") || message.contains("lookup") {
            Some(FetchHint::Dns)
        } else if message.contains("refused") {
            Some(FetchHint::Refused)
        } else if message.contains("reset") || message.contains("hang up") {
            Some(FetchHint::Reset)
        } else if cause.is_connect() {
            Some(FetchHint::Unknown)
        } else {
            None
        };

        Self {
            url: url.to_string(),
            message,
            hint,
            transient,
            cause: Some(cause),
        }
    }

    /// Produced when a root cancellation signal fires mid-fetch (spec §5.9:
    /// "a root cancellation signal is threaded to all workers and all HTTP
    /// operations"). Never transient — cancellation is terminal, not a
    /// condition worth retrying.
    pub fn cancelled(url: &str) -> Self {
        Self { url: url.to_string(), message: "cancelled".to_string(), hint: None, transient: false, cause: None }
    }

    /// Render the canonical human format used by the CLI collaborator.
    pub fn to_detailed_string(&self) -> String {
        let mut s = format!("[{}] {}", self.url, self.message);
        if let Some(hint) = self.hint {
            s.push_str(&format!(" -- {hint}"));
        }
        s
    }
}

/// OS-level transient error codes that make a fetch retry-worthy.
const TRANSIENT_CODES: &[&str] = &[
    "ECONNRESET",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "EPIPE",
    "ENOTFOUND",
    "EAI_AGAIN",
];

fn is_transient_message(message: &str) -> bool {
    TRANSIENT_CODES.iter().any(|code| message.contains(code))
        || message.contains("socket hang up")
        || message.contains("connection reset")
}

/// Stable, machine-matchable error codes for the source-map pipeline (C4).
/// Four mutually exclusive categories: Network, Parse, Validation, Vlq.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceMapErrorCode {
    // Network
    FetchFailed,
    FetchTimeout,
    FetchDnsError,
    FetchConnectionRefused,
    FetchConnectionReset,
    FetchSslError,
    HttpError,
    // Parse
    InvalidJson,
    InvalidBase64,
    InvalidDataUri,
    // Validation
    InvalidVersion,
    MissingVersion,
    MissingSources,
    MissingMappings,
    SourcesNotArray,
    InvalidSourceRoot,
    InvalidNames,
    InvalidFile,
    InvalidSourcesContent,
    InvalidIgnoreList,
    InvalidIndexMapSections,
    InvalidIndexMapOffset,
    InvalidIndexMapSectionMap,
    IndexMapOverlap,
    IndexMapInvalidOrder,
    IndexMapNested,
    IndexMapWithMappings,
    SourceMapTooLarge,
    // VLQ
    InvalidVlq,
    InvalidMappingSegment,
    MappingSourceIndexOutOfBounds,
    MappingNameIndexOutOfBounds,
    MappingNegativeValue,
    MappingValueExceeds32Bits,
}

impl SourceMapErrorCode {
    pub fn as_str(&self) -> &'static str {
        use SourceMapErrorCode::*;
        match self {
            FetchFailed => "FETCH_FAILED",
            FetchTimeout => "FETCH_TIMEOUT",
            FetchDnsError => "FETCH_DNS_ERROR",
            FetchConnectionRefused => "FETCH_CONNECTION_REFUSED",
            FetchConnectionReset => "FETCH_CONNECTION_RESET",
            FetchSslError => "FETCH_SSL_ERROR",
            HttpError => "HTTP_ERROR",
            InvalidJson => "INVALID_JSON",
            InvalidBase64 => "INVALID_BASE64",
            InvalidDataUri => "INVALID_DATA_URI",
            InvalidVersion => "INVALID_VERSION",
            MissingVersion => "MISSING_VERSION",
            MissingSources => "MISSING_SOURCES",
            MissingMappings => "MISSING_MAPPINGS",
            SourcesNotArray => "SOURCES_NOT_ARRAY",
            InvalidSourceRoot => "INVALID_SOURCE_ROOT",
            InvalidNames => "INVALID_NAMES",
            InvalidFile => "INVALID_FILE",
            InvalidSourcesContent => "INVALID_SOURCES_CONTENT",
            InvalidIgnoreList => "INVALID_IGNORE_LIST",
            InvalidIndexMapSections => "INVALID_INDEX_MAP_SECTIONS",
            InvalidIndexMapOffset => "INVALID_INDEX_MAP_OFFSET",
            InvalidIndexMapSectionMap => "INVALID_INDEX_MAP_SECTION_MAP",
            IndexMapOverlap => "INDEX_MAP_OVERLAP",
            IndexMapInvalidOrder => "INDEX_MAP_INVALID_ORDER",
            IndexMapNested => "INDEX_MAP_NESTED",
            IndexMapWithMappings => "INDEX_MAP_WITH_MAPPINGS",
            SourceMapTooLarge => "SOURCE_MAP_TOO_LARGE",
            InvalidVlq => "INVALID_VLQ",
            InvalidMappingSegment => "INVALID_MAPPING_SEGMENT",
            MappingSourceIndexOutOfBounds => "MAPPING_SOURCE_INDEX_OUT_OF_BOUNDS",
            MappingNameIndexOutOfBounds => "MAPPING_NAME_INDEX_OUT_OF_BOUNDS",
            MappingNegativeValue => "MAPPING_NEGATIVE_VALUE",
            MappingValueExceeds32Bits => "MAPPING_VALUE_EXCEEDS_32_BITS",
        }
    }

    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::FetchFailed
                | Self::FetchTimeout
                | Self::FetchDnsError
                | Self::FetchConnectionRefused
                | Self::FetchConnectionReset
                | Self::FetchSslError
                | Self::HttpError
        )
    }

    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::InvalidJson | Self::InvalidBase64 | Self::InvalidDataUri)
    }

    pub fn is_validation_error(&self) -> bool {
        !self.is_network_error() && !self.is_parse_error() && !self.is_vlq_error()
    }

    pub fn is_vlq_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidVlq
                | Self::InvalidMappingSegment
                | Self::MappingSourceIndexOutOfBounds
                | Self::MappingNameIndexOutOfBounds
                | Self::MappingNegativeValue
                | Self::MappingValueExceeds32Bits
        )
    }
}

impl fmt::Display for SourceMapErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single structured error from the source-map pipeline: stable code,
/// message, optional url/cause, optional key/value details, optional
/// segment location for VLQ errors.
#[derive(Error, Debug, Clone)]
#[error("{code}: {message}")]
pub struct SourceMapError {
    pub code: SourceMapErrorCode,
    pub message: String,
    pub url: Option<String>,
    pub details: Vec<(String, String)>,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl SourceMapError {
    pub fn new(code: SourceMapErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            url: None,
            details: Vec::new(),
            line: None,
            column: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.push((key.into(), value.into()));
        self
    }

    pub fn at_location(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn to_detailed_string(&self) -> String {
        let mut s = format!("[{}] {}", self.code, self.message);
        if let (Some(l), Some(c)) = (self.line, self.column) {
            s.push_str(&format!(" at {l}:{c}"));
        }
        if let Some(ref url) = self.url {
            s.push_str(&format!(" ({url})"));
        }
        for (k, v) in &self.details {
            s.push_str(&format!(" {k}={v}"));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_partition_is_disjoint() {
        let codes = [
            SourceMapErrorCode::FetchFailed,
            SourceMapErrorCode::InvalidJson,
            SourceMapErrorCode::InvalidVersion,
            SourceMapErrorCode::InvalidVlq,
        ];
        for code in codes {
            let flags = [
                code.is_network_error(),
                code.is_parse_error(),
                code.is_validation_error(),
                code.is_vlq_error(),
            ];
            assert_eq!(flags.iter().filter(|b| **b).count(), 1, "code {code} not in exactly one category");
        }
    }

    #[test]
    fn is_transient_message_matches_known_codes() {
        assert!(is_transient_message("connect ECONNREFUSED 1.2.3.4:443"));
        assert!(is_transient_message("socket hang up"));
        assert!(!is_transient_message("404 Not Found"));
    }
}
