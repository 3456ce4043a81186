//! Source-map subsystem: discovery (C3), parsing/validation and extraction
//! (C4).

pub mod discovery;
pub mod extractor;
pub mod model;
pub mod parser;
pub mod path;
pub mod vlq;

pub use discovery::{discover, DiscoveredMap, LocationType};
pub use extractor::extract;
pub use model::{ExtractedSource, ExtractionMetadata, ExtractionResult, SourceMap};
pub use parser::parse_and_validate;
