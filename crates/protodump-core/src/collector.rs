//! Decoding scanner candidates into descriptor records.
//!
//! The collector is the acceptor the [`Scanner`](crate::scanner::Scanner)
//! talks to. For each offered window it decides whether the window holds a
//! whole record, a truncated one, or nothing usable.

use crate::descriptor::FileDescriptor;
use crate::error::{Error, Result};
use crate::scanner::{Candidate, ScanStrategy, ScanSummary, Verdict};
use crate::wire;
use prost::Message;
use std::collections::HashSet;
use tracing::{debug, trace};

/// What happened to one candidate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Decoded and stored
    Accepted,
    /// The window ends inside the record; offer a wider one
    NeedsWiderWindow,
    /// Not a record; move past this window
    Invalid,
    /// A record with this name was already stored
    Duplicate,
}

impl Outcome {
    /// Whether the scanner should stop widening this window.
    pub fn is_final(self) -> bool {
        !matches!(self, Outcome::NeedsWiderWindow)
    }

    /// The scanner's view. Only stored records are kept.
    pub fn verdict(self) -> Verdict {
        match self {
            Outcome::Accepted => Verdict::Keep,
            Outcome::NeedsWiderWindow => Verdict::Widen,
            Outcome::Invalid | Outcome::Duplicate => Verdict::Skip,
        }
    }
}

/// Result of [`Collector::try_decode`].
#[derive(Debug)]
pub struct Decoded {
    /// Classification of the window
    pub outcome: Outcome,
    /// The decode failure, if any
    pub error: Option<Error>,
}

impl Decoded {
    fn ok(outcome: Outcome) -> Self {
        Self {
            outcome,
            error: None,
        }
    }

    fn failed(outcome: Outcome, error: Error) -> Self {
        Self {
            outcome,
            error: Some(error),
        }
    }
}

/// Accumulates decoded records in first-accepted order.
#[derive(Debug, Default)]
pub struct Collector {
    records: Vec<FileDescriptor>,
    names: HashSet<String>,
}

impl Collector {
    /// Creates an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to decode `window` as the record for file `name`.
    pub fn try_decode(&mut self, name: &str, window: &[u8]) -> Decoded {
        let record = match decode_record(name, window) {
            Ok(record) => record,
            Err(e) if e.is_truncation() => {
                trace!("'{}' truncated after {} bytes: {}", name, window.len(), e);
                return Decoded::failed(Outcome::NeedsWiderWindow, e);
            }
            Err(e) => {
                trace!("'{}' rejected: {}", name, e);
                return Decoded::failed(Outcome::Invalid, e);
            }
        };

        if !self.names.insert(name.to_string()) {
            debug!("skipping duplicate record '{}'", name);
            return Decoded::ok(Outcome::Duplicate);
        }

        debug!("collected '{}' ({} bytes)", name, window.len());
        self.records.push(record);
        Decoded::ok(Outcome::Accepted)
    }

    /// Scanner acceptor.
    pub fn accept(&mut self, candidate: &Candidate<'_>) -> Verdict {
        self.try_decode(candidate.name, candidate.bytes)
            .outcome
            .verdict()
    }

    /// Run `scanner` over `data`, collecting every record found.
    pub fn collect_from(&mut self, scanner: &dyn ScanStrategy, data: &[u8]) -> ScanSummary {
        scanner.scan(data, &mut |candidate| self.accept(candidate))
    }

    /// Records collected so far.
    pub fn records(&self) -> &[FileDescriptor] {
        &self.records
    }

    /// Number of records collected so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consumes the collector, returning its records.
    pub fn into_records(self) -> Vec<FileDescriptor> {
        self.records
    }
}

/// Structural check first, so truncation is told apart from garbage; prost
/// then does the real decode.
fn decode_record(name: &str, window: &[u8]) -> Result<FileDescriptor> {
    wire::probe_record(window)?;
    let record = FileDescriptor::decode(window)?;
    if record.name() != name {
        return Err(Error::name_mismatch(name, record.name()));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EnumDescriptor, EnumValueDescriptor};
    use crate::scanner::{Scanner, ScannerConfig};

    fn record_with_zero(name: &str) -> FileDescriptor {
        FileDescriptor {
            name: Some(name.into()),
            package: Some("pkg".into()),
            enum_type: vec![EnumDescriptor {
                name: Some("Kind".into()),
                value: vec![
                    EnumValueDescriptor {
                        name: Some("UNKNOWN".into()),
                        number: Some(0),
                        ..Default::default()
                    },
                    EnumValueDescriptor {
                        name: Some("OTHER".into()),
                        number: Some(1),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_complete_record() {
        let record = record_with_zero("a.proto");
        let bytes = record.encode_to_vec();

        let mut collector = Collector::new();
        let decoded = collector.try_decode("a.proto", &bytes);
        assert_eq!(decoded.outcome, Outcome::Accepted);
        assert!(decoded.error.is_none());
        assert_eq!(collector.records(), &[record]);
    }

    #[test]
    fn test_truncated_window_needs_wider() {
        let bytes = record_with_zero("a.proto").encode_to_vec();
        let zero = bytes.iter().position(|&b| b == 0).unwrap();

        let mut collector = Collector::new();
        let decoded = collector.try_decode("a.proto", &bytes[..zero]);
        assert_eq!(decoded.outcome, Outcome::NeedsWiderWindow);
        assert!(decoded.error.unwrap().is_truncation());
        assert!(collector.is_empty());
    }

    #[test]
    fn test_garbage_is_invalid() {
        let mut window = vec![0x0A, 0x07];
        window.extend_from_slice(b"a.proto");
        window.extend_from_slice(&[0x07, 0x01]);

        let mut collector = Collector::new();
        let decoded = collector.try_decode("a.proto", &window);
        assert_eq!(decoded.outcome, Outcome::Invalid);
        assert!(decoded.outcome.is_final());
        assert_eq!(decoded.outcome.verdict(), Verdict::Skip);
    }

    #[test]
    fn test_name_mismatch_is_invalid() {
        let bytes = record_with_zero("a.proto").encode_to_vec();
        let mut collector = Collector::new();
        let decoded = collector.try_decode("b.proto", &bytes);
        assert_eq!(decoded.outcome, Outcome::Invalid);
        assert!(matches!(decoded.error, Some(Error::NameMismatch { .. })));
    }

    #[test]
    fn test_duplicates_are_not_stored() {
        let bytes = record_with_zero("a.proto").encode_to_vec();
        let mut collector = Collector::new();
        assert_eq!(collector.try_decode("a.proto", &bytes).outcome, Outcome::Accepted);
        assert_eq!(collector.try_decode("a.proto", &bytes).outcome, Outcome::Duplicate);
        assert_eq!(collector.len(), 1);
        assert_eq!(Outcome::Duplicate.verdict(), Verdict::Skip);
    }

    #[test]
    fn test_scan_recovers_record_with_embedded_zero() {
        let record = record_with_zero("dir/a.proto");
        let bytes = record.encode_to_vec();
        assert!(bytes.contains(&0));

        let mut data = vec![0xDE, 0xAD, 0xBE, 0xEF];
        data.extend_from_slice(&bytes);
        data.extend_from_slice(&[0x00, 0x00, 0x99]);

        let mut collector = Collector::new();
        let mut offers = Vec::new();
        let scanner = Scanner::new();
        scanner.scan(&data, &mut |candidate| {
            offers.push(candidate.range());
            collector.accept(candidate)
        });

        assert_eq!(collector.records(), &[record]);
        assert!(offers.len() >= 2);
        assert_eq!(offers.last(), Some(&(4..4 + bytes.len())));
    }

    #[test]
    fn test_max_results_counts_stored_records_only() {
        // A plausible header followed by garbage, then the real record
        let mut data = vec![0x0A, 0x07];
        data.extend_from_slice(b"x.proto");
        data.extend_from_slice(&[0x07, 0x01, 0x00]);
        let record = record_with_zero("real.proto");
        data.extend_from_slice(&record.encode_to_vec());
        data.push(0x00);

        let scanner = Scanner::with_config(ScannerConfig::new().max_results(1));
        let mut collector = Collector::new();
        let summary = collector.collect_from(&scanner, &data);

        assert_eq!(collector.records(), &[record]);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.skipped, 1);
    }
}
