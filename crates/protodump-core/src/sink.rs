//! Destinations for rendered `.proto` files.
//!
//! [`Renderer::dump_files`](crate::Renderer::dump_files) hands every rendered
//! file to a [`ProtoSink`]. The crate only ships in-memory sinks; writing to
//! disk is left to the caller, which owns path policy.

use crate::error::Result;
use crate::render::RenderedFile;

/// Receives rendered files one at a time.
///
/// # Example
///
/// ```ignore
/// use protodump_core::{ProtoSink, Result};
///
/// struct StdoutSink;
///
/// impl ProtoSink for StdoutSink {
///     fn write_proto(&mut self, name: &str, text: &str) -> Result<()> {
///         println!("// {}\n{}", name, text);
///         Ok(())
///     }
/// }
/// ```
pub trait ProtoSink {
    /// Store the text of the file named `name`.
    fn write_proto(&mut self, name: &str, text: &str) -> Result<()>;
}

impl ProtoSink for Vec<RenderedFile> {
    fn write_proto(&mut self, name: &str, text: &str) -> Result<()> {
        self.push(RenderedFile {
            name: name.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// A sink that discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl ProtoSink for NullSink {
    fn write_proto(&mut self, _name: &str, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// A sink that only counts what it is given
#[derive(Debug, Default)]
pub struct StatsSink {
    /// Number of files
    pub files: usize,
    /// Total bytes of text
    pub bytes: usize,
}

impl ProtoSink for StatsSink {
    fn write_proto(&mut self, _name: &str, text: &str) -> Result<()> {
        self.files += 1;
        self.bytes += text.len();
        Ok(())
    }
}
