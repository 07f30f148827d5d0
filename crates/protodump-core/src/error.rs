//! Error types for the protodump-core library.
//!
//! Scan-level and decode-level failures are mostly internal control signals
//! (see [`Error::is_truncation`]); link-level failures are surfaced to the
//! caller as a complete [`LinkErrors`] list.

use crate::link::LinkErrors;
use thiserror::Error;

/// Result type alias for protodump operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all protodump operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The buffer ended before the field starting at `offset` was complete
    #[error("buffer truncated inside field at offset {offset}")]
    Truncated {
        /// Byte offset of the incomplete field
        offset: usize,
    },

    /// Invalid protobuf wire format
    #[error("invalid protobuf wire format at offset {offset}: {details}")]
    InvalidWireFormat {
        /// Byte offset where the error occurred
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// Varint longer than ten bytes
    #[error("failed to decode varint at offset {offset}: invalid encoding")]
    VarintDecode {
        /// Byte offset where the error occurred
        offset: usize,
    },

    /// Invalid field number in a tag
    #[error("invalid field number {number}: must be between 1 and {max}")]
    InvalidFieldNumber {
        /// The invalid field number
        number: u32,
        /// Maximum valid field number
        max: u32,
    },

    /// Failed to decode a descriptor record
    #[error("failed to parse descriptor record: {0}")]
    DescriptorParse(#[from] prost::DecodeError),

    /// The decoded record names a different file than the scanned candidate
    #[error("candidate '{expected}' decoded as a record named '{found}'")]
    NameMismatch {
        /// Name read from the scanner header
        expected: String,
        /// Name stored in the decoded record
        found: String,
    },

    /// The collected records do not form a closed symbol graph
    #[error(transparent)]
    Link(#[from] LinkErrors),

    /// An extension declaration without an extendee
    #[error("empty extendee in extension declared by '{file}'")]
    EmptyExtendee {
        /// File declaring the extension
        file: String,
    },

    /// Writing rendered text failed
    #[error("failed to format output: {0}")]
    Format(#[from] std::fmt::Error),

    /// No descriptors found in input
    #[error("no protobuf descriptors found in input")]
    NoDescriptorsFound,

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new truncation error
    pub fn truncated(offset: usize) -> Self {
        Self::Truncated { offset }
    }

    /// Creates a new wire format error
    pub fn invalid_wire_format(offset: usize, details: impl Into<String>) -> Self {
        Self::InvalidWireFormat {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new varint decode error
    pub fn varint_decode(offset: usize) -> Self {
        Self::VarintDecode { offset }
    }

    /// Creates a new name mismatch error
    pub fn name_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::NameMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if the input simply ended too early.
    ///
    /// The collector maps this to a request for a wider scan window.
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }

    /// Shifts wire-level offsets by `base`, for errors raised on a sub-slice.
    pub(crate) fn offset_by(self, base: usize) -> Self {
        match self {
            Self::Truncated { offset } => Self::Truncated {
                offset: offset + base,
            },
            Self::InvalidWireFormat { offset, details } => Self::InvalidWireFormat {
                offset: offset + base,
                details,
            },
            Self::VarintDecode { offset } => Self::VarintDecode {
                offset: offset + base,
            },
            other => other,
        }
    }
}
