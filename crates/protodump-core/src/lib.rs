//! # protodump-core
//!
//! A library for recovering Protocol Buffer schemas from compiled binaries.
//!
//! Programs built with protobuf support usually embed each `.proto` file as a
//! serialized `FileDescriptorProto`. This crate finds those records, checks
//! that they form a closed set, and renders them back to `.proto` text.
//!
//! ## Architecture
//!
//! - [`scanner`]: finds candidate records in arbitrary bytes
//! - [`collector`]: decodes candidates into [`FileDescriptor`] records
//! - [`link`]: resolves imports and type references across records
//! - [`render`](mod@render): turns a linked graph back into `.proto` text
//! - [`wire`] and [`options`]: raw wire-format access
//! - [`error`]: error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use protodump_core::{analyze, Collector, Renderer, Scanner};
//! use std::fs;
//!
//! let data = fs::read("./target/release/my_app")?;
//!
//! let mut collector = Collector::new();
//! collector.collect_from(&Scanner::new(), &data);
//!
//! let graph = analyze(collector.records())?;
//! for file in Renderer::new(&graph).render_all()? {
//!     println!("// {}\n{}", file.name, file.text);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! - [`ScanStrategy`]: replace the candidate search
//! - [`ProtoSink`]: decide where rendered files go

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod collector;
#[allow(missing_docs)]
pub mod descriptor;
pub mod error;
pub mod link;
pub mod options;
pub mod render;
pub mod scanner;
pub mod sink;
pub mod wire;

// Re-export primary types for convenience
pub use collector::{Collector, Decoded, Outcome};
pub use descriptor::FileDescriptor;
pub use error::{Error, Result};
pub use link::{analyze, Declaration, LinkErrors, LinkIssue, SymbolGraph};
pub use options::{OptionValue, OptionsBag};
pub use render::{Import, RenderConfig, RenderedFile, Renderer};
pub use scanner::{Candidate, ScanStrategy, ScanSummary, Scanner, ScannerConfig, Verdict};
pub use sink::{NullSink, ProtoSink, StatsSink};

use tracing::info;

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum valid protobuf field number (2^29 - 1)
/// Used for `extensions X to max` and `reserved X to max` ranges
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;

/// Run the whole pipeline over `data` with default settings.
///
/// Fails with [`Error::NoDescriptorsFound`] when the scan yields nothing,
/// and with [`Error::Link`] when the collected records are not closed.
pub fn extract(data: &[u8]) -> Result<Vec<RenderedFile>> {
    let mut collector = Collector::new();
    let summary = collector.collect_from(&Scanner::new(), data);
    info!(
        "scanned {} candidates, collected {} records",
        summary.candidates,
        collector.len()
    );

    if collector.is_empty() {
        return Err(Error::NoDescriptorsFound);
    }

    render(collector.records())
}

/// Link `records` and render every one of them.
pub fn render(records: &[FileDescriptor]) -> Result<Vec<RenderedFile>> {
    let graph = analyze(records)?;
    Renderer::new(&graph).render_all()
}
