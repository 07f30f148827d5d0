//! Binary scanning for embedded descriptor records.
//!
//! ## Algorithm Overview
//!
//! A serialized `FileDescriptorProto` starts with its `name` field: the tag
//! byte `0x0A` (field 1, wire type LEN), a length byte, and the file name.
//! Records emitted into executables are usually followed by a zero byte.
//!
//! 1. Find the next `0x0A` byte.
//! 2. Read the one-byte name length and check that the name looks like a
//!    relative `.proto` path.
//! 3. Take the window from the tag up to the next zero byte and offer it to
//!    the acceptor.
//! 4. If the acceptor answers [`Verdict::Widen`], the record contains a zero
//!    byte of its own: widen the window to the *following* zero byte and
//!    offer it again, until the acceptor settles on it or no zero byte is
//!    left.
//! 5. A settled window ([`Verdict::Keep`] or [`Verdict::Skip`]) is stepped
//!    over. Only kept windows count towards [`ScannerConfig::max_results`].
//!
//! The one-byte length limits discoverable names to 255 bytes.
//!
//! ## Extensibility
//!
//! The [`ScanStrategy`] trait allows custom scanning algorithms:
//!
//! ```no_run
//! use protodump_core::scanner::{Candidate, ScanStrategy, ScanSummary, Verdict};
//!
//! struct NothingScanner;
//!
//! impl ScanStrategy for NothingScanner {
//!     fn scan(
//!         &self,
//!         _data: &[u8],
//!         _acceptor: &mut dyn FnMut(&Candidate<'_>) -> Verdict,
//!     ) -> ScanSummary {
//!         ScanSummary::default()
//!     }
//! }
//! ```

use memchr::memchr;
use std::ops::Range;
use tracing::{debug, trace};

/// Tag byte of field 1 (name) with wire type LEN: (1 << 3) | 2
pub const NAME_TAG: u8 = 0x0A;

/// Tag byte plus one-byte name length
const HEADER_LEN: usize = 2;

/// Required file name suffix
const PROTO_SUFFIX: &[u8] = b".proto";

/// A window offered to the acceptor.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// File name read from the record header
    pub name: &'a str,
    /// Offset of the tag byte in the scanned buffer
    pub offset: usize,
    /// The speculative record bytes, tag byte included
    pub bytes: &'a [u8],
}

impl Candidate<'_> {
    /// Byte range in the scanned buffer.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.bytes.len()
    }
}

/// The acceptor's answer for one offered window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The window held a result; count it and resume after the window
    Keep,
    /// Nothing usable in this window; resume after it without counting it
    Skip,
    /// The window ends too early; offer a wider one at the same offset
    Widen,
}

/// Configuration for the scanner
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Stop after this many windows were kept (0 = unlimited)
    pub max_results: usize,
    /// Never widen a window beyond this many bytes
    pub max_window_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_results: 0,
            max_window_size: 10 * 1024 * 1024, // 10 MB
        }
    }
}

impl ScannerConfig {
    /// Creates a new scanner config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of kept windows
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Sets the window size limit
    pub fn max_window_size(mut self, size: usize) -> Self {
        self.max_window_size = size;
        self
    }
}

/// Counters describing one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Start positions whose header passed the name check
    pub candidates: usize,
    /// Windows the acceptor kept
    pub accepted: usize,
    /// Windows the acceptor settled on without keeping them
    pub skipped: usize,
    /// Windows offered again after widening
    pub retries: usize,
}

/// Trait for implementing custom scanning strategies
pub trait ScanStrategy: Send + Sync {
    /// Offer every candidate window in `data` to `acceptor`, in ascending
    /// offset order. The acceptor returns [`Verdict::Widen`] to ask for a
    /// wider window at the same offset.
    fn scan(
        &self,
        data: &[u8],
        acceptor: &mut dyn FnMut(&Candidate<'_>) -> Verdict,
    ) -> ScanSummary;
}

/// Primary scanner for finding embedded descriptor records
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    config: ScannerConfig,
}

/// Where the retry loop for one start position ended.
enum Attempt {
    /// Settled; scanning resumes at `end`
    Settled { end: usize, kept: bool },
    /// No acceptable window at this start
    Exhausted,
}

impl Scanner {
    /// Creates a new scanner with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Offer growing windows starting at `start` until one is settled.
    ///
    /// The first window ends at the first zero byte after the name; each
    /// [`Verdict::Widen`] moves the end to the next zero byte.
    fn try_start(
        &self,
        data: &[u8],
        start: usize,
        name: &str,
        summary: &mut ScanSummary,
        acceptor: &mut dyn FnMut(&Candidate<'_>) -> Verdict,
    ) -> Attempt {
        let mut search_from = start + HEADER_LEN + name.len();
        let mut first = true;

        loop {
            let Some(found) = memchr(0, &data[search_from..]) else {
                trace!("no terminator left for '{}' at {}", name, start);
                return Attempt::Exhausted;
            };
            let end = search_from + found;

            if end - start > self.config.max_window_size {
                trace!("window for '{}' at {} exceeds size limit", name, start);
                return Attempt::Exhausted;
            }

            if !first {
                summary.retries += 1;
            }
            first = false;

            let candidate = Candidate {
                name,
                offset: start,
                bytes: &data[start..end],
            };
            trace!("offering '{}' at {}..{}", name, start, end);

            match acceptor(&candidate) {
                Verdict::Keep => return Attempt::Settled { end, kept: true },
                Verdict::Skip => return Attempt::Settled { end, kept: false },
                Verdict::Widen => {}
            }

            search_from = end + 1;
            if search_from >= data.len() {
                return Attempt::Exhausted;
            }
        }
    }
}

impl ScanStrategy for Scanner {
    fn scan(
        &self,
        data: &[u8],
        acceptor: &mut dyn FnMut(&Candidate<'_>) -> Verdict,
    ) -> ScanSummary {
        let mut summary = ScanSummary::default();
        let mut position = 0;

        debug!("Starting scan of {} bytes", data.len());

        while let Some(found) = memchr(NAME_TAG, &data[position..]) {
            let start = position + found;

            let Some(name) = header_name(data, start) else {
                position = start + 1;
                continue;
            };
            summary.candidates += 1;

            match self.try_start(data, start, name, &mut summary, acceptor) {
                Attempt::Settled { end, kept: false } => {
                    summary.skipped += 1;
                    position = end;
                }
                Attempt::Settled { end, kept: true } => {
                    summary.accepted += 1;
                    if self.config.max_results > 0 && summary.accepted >= self.config.max_results {
                        break;
                    }
                    position = end;
                }
                Attempt::Exhausted => position = start + 1,
            }
        }

        debug!(
            "Scan complete: {} candidates, {} accepted, {} skipped, {} retries",
            summary.candidates, summary.accepted, summary.skipped, summary.retries
        );
        summary
    }
}

/// The file name declared by a record header at `start`, if plausible.
fn header_name(data: &[u8], start: usize) -> Option<&str> {
    let declared = *data.get(start + 1)? as usize;
    let name_start = start + HEADER_LEN;
    let name = data.get(name_start..name_start + declared)?;

    if !is_plausible_proto_path(name) {
        return None;
    }
    std::str::from_utf8(name).ok()
}

/// Relative path made of `[A-Za-z0-9_/\\.]`, ending in `.proto`.
pub fn is_plausible_proto_path(name: &[u8]) -> bool {
    name.len() > PROTO_SUFFIX.len()
        && name.ends_with(PROTO_SUFFIX)
        && name
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'/' | b'\\' | b'.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(name: &str) -> Vec<u8> {
        let mut out = vec![NAME_TAG, name.len() as u8];
        out.extend_from_slice(name.as_bytes());
        out
    }

    fn collect_offers(
        data: &[u8],
        accept: impl Fn(&Candidate<'_>) -> Verdict,
    ) -> Vec<Range<usize>> {
        let mut offers = Vec::new();
        Scanner::new().scan(data, &mut |c| {
            offers.push(c.range());
            accept(c)
        });
        offers
    }

    #[test]
    fn test_scanner_config_builder() {
        let config = ScannerConfig::new().max_results(10).max_window_size(1000);
        assert_eq!(config.max_results, 10);
        assert_eq!(config.max_window_size, 1000);
    }

    #[test]
    fn test_empty_input() {
        let summary = Scanner::new().scan(&[], &mut |_| Verdict::Keep);
        assert_eq!(summary, ScanSummary::default());
    }

    #[test]
    fn test_no_candidates() {
        let data = b"this is just some random data\nwithout any protobuf content\0";
        let offers = collect_offers(data, |_| Verdict::Keep);
        assert!(offers.is_empty());
    }

    #[test]
    fn test_plausible_names() {
        assert!(is_plausible_proto_path(b"a.proto"));
        assert!(is_plausible_proto_path(b"google/protobuf/descriptor.proto"));
        assert!(is_plausible_proto_path(b"dir\\file_1.proto"));
        assert!(!is_plausible_proto_path(b".proto"));
        assert!(!is_plausible_proto_path(b"../../evil"));
        assert!(!is_plausible_proto_path(b"has space.proto"));
        assert!(!is_plausible_proto_path(b"dash-name.proto"));
        assert!(!is_plausible_proto_path(b"file.proto2"));
    }

    #[test]
    fn test_single_window() {
        let mut data = b"junk".to_vec();
        data.extend(header("a.proto"));
        data.extend_from_slice(&[0x12, 0x01, b'x', 0x00, 0xFF]);

        let offers = collect_offers(&data, |_| Verdict::Keep);
        assert_eq!(offers, vec![4..16]);
    }

    #[test]
    fn test_rejected_window_is_widened() {
        let mut data = header("a.proto");
        data.extend_from_slice(&[0x01, 0x00, 0x02, 0x00, 0x03, 0x00]);

        // Reject everything shorter than the second terminator
        let offers = collect_offers(&data, |c| {
            if c.bytes.len() >= 12 {
                Verdict::Keep
            } else {
                Verdict::Widen
            }
        });
        assert_eq!(offers, vec![0..10, 0..12]);
    }

    #[test]
    fn test_exhausted_start_is_abandoned() {
        let mut data = header("a.proto");
        data.extend_from_slice(&[0x01, 0x00, 0x02]);

        let mut summary_offers = Vec::new();
        let summary = Scanner::new().scan(&data, &mut |c| {
            summary_offers.push(c.range());
            Verdict::Widen
        });
        assert_eq!(summary_offers, vec![0..10]);
        assert_eq!(summary.accepted, 0);
        assert_eq!(summary.candidates, 1);
    }

    #[test]
    fn test_bad_names_never_offered() {
        let mut data = Vec::new();
        data.extend(header("../../evil"));
        data.push(0x00);
        data.extend(header("bad name.proto"));
        data.push(0x00);
        data.extend(header("x.proto"));
        data.extend_from_slice(&[0x00]);

        let offers = collect_offers(&data, |_| Verdict::Keep);
        assert_eq!(offers.len(), 1);
        let start = offers[0].start;
        assert_eq!(&data[start + 2..start + 9], b"x.proto");
    }

    #[test]
    fn test_windows_ascend_without_overlap() {
        let mut data = Vec::new();
        for name in ["a.proto", "b.proto", "c.proto"] {
            data.extend(header(name));
            data.extend_from_slice(&[0x12, 0x00, 0x01, 0x00, 0x33]);
        }

        // Every other offer is rejected to force widening
        let mut flip = false;
        let mut accepted = Vec::new();
        Scanner::new().scan(&data, &mut |c| {
            flip = !flip;
            if !flip {
                accepted.push(c.range());
            }
            if flip {
                Verdict::Widen
            } else {
                Verdict::Keep
            }
        });

        assert!(!accepted.is_empty());
        for pair in accepted.windows(2) {
            assert!(pair[0].end <= pair[1].start);
            assert!(pair[0].start < pair[1].start);
        }
    }

    #[test]
    fn test_max_results() {
        let mut data = Vec::new();
        for name in ["a.proto", "b.proto"] {
            data.extend(header(name));
            data.push(0x00);
        }
        let scanner = Scanner::with_config(ScannerConfig::new().max_results(1));
        let summary = scanner.scan(&data, &mut |_| Verdict::Keep);
        assert_eq!(summary.accepted, 1);
    }

    #[test]
    fn test_skipped_windows_do_not_count_towards_max_results() {
        let mut data = Vec::new();
        for name in ["bad.proto", "a.proto", "b.proto"] {
            data.extend(header(name));
            data.push(0x00);
        }

        let scanner = Scanner::with_config(ScannerConfig::new().max_results(1));
        let mut kept = Vec::new();
        let summary = scanner.scan(&data, &mut |c| {
            if c.name == "bad.proto" {
                return Verdict::Skip;
            }
            kept.push(c.name.to_string());
            Verdict::Keep
        });

        assert_eq!(kept, vec!["a.proto"]);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.accepted, 1);
    }

    #[test]
    fn test_window_size_limit() {
        let mut data = header("a.proto");
        data.extend_from_slice(&[0x01; 64]);
        data.push(0x00);
        let scanner = Scanner::with_config(ScannerConfig::new().max_window_size(16));
        let summary = scanner.scan(&data, &mut |_| Verdict::Keep);
        assert_eq!(summary.accepted, 0);
    }
}
