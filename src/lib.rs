//! sitesource - reconstructs a buildable local copy of a deployed web app
//! from its public URL by recovering original sources from source maps,
//! crawling the site, and capturing its API traffic and static assets.
//!
//! # Example
//!
//! ```
//! use sitesource::sourcemap::{parse_and_validate, extract};
//!
//! # fn run() -> sitesource::Result<()> {
//! let raw = r#"{"version":3,"sources":["a.js"],"names":[],"mappings":""}"#;
//! let map = parse_and_validate(raw)?;
//! let extracted = extract(&map, "app.js", "https://example.com/app.js.map");
//! println!("recovered {} source files", extracted.files.len());
//! # Ok(())
//! # }
//! ```

pub mod bundles;
pub mod cache;
pub mod capture;
pub mod crawl;
pub mod error;
pub mod http;
pub mod manifest;
pub mod orchestrator;
pub mod reconstruct;
pub mod rewrite;
pub mod sourcemap;
pub mod types;
pub mod version;
pub mod wal;

pub mod browser;
pub mod config;

pub use error::{ReconError, Result};
