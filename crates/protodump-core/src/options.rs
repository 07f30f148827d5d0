//! Generic options storage.
//!
//! Options messages (`FileOptions`, `FieldOptions`, ...) carry both the
//! well-known options and any number of custom options declared as
//! extensions elsewhere. Neither kind is decoded through a typed schema here:
//! an [`OptionsBag`] is simply every field of the options message, keyed by
//! field number, with its raw wire value. The caller supplies the type when
//! it knows which field it is asking for.

use crate::error::Result;
use crate::wire::{self, RawValue};
use bytes::{Bytes, BytesMut};

/// A raw option value as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// VARINT: integers, bools and enums
    Varint(u64),
    /// I64: fixed64, sfixed64, double
    Fixed64(u64),
    /// I32: fixed32, sfixed32, float
    Fixed32(u32),
    /// LEN: strings, bytes and nested messages
    Bytes(Bytes),
}

/// Field-number keyed view over an encoded options message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionsBag {
    entries: Vec<(u32, OptionValue)>,
}

impl OptionsBag {
    /// Parse the encoded body of an options message.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        for field in wire::fields(data) {
            let field = field?;
            let value = match field.value {
                RawValue::Varint(v) => OptionValue::Varint(v),
                RawValue::I64(v) => OptionValue::Fixed64(v),
                RawValue::I32(v) => OptionValue::Fixed32(v),
                RawValue::Len(b) => OptionValue::Bytes(Bytes::copy_from_slice(b)),
            };
            entries.push((field.number, value));
        }
        Ok(Self { entries })
    }

    /// Returns true if no fields were stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of stored field occurrences.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether at least one value is stored for `number`.
    pub fn contains(&self, number: u32) -> bool {
        self.entries.iter().any(|(n, _)| *n == number)
    }

    /// Every stored value for `number`, in wire order.
    pub fn get_all(&self, number: u32) -> impl Iterator<Item = &OptionValue> + '_ {
        self.entries
            .iter()
            .filter(move |(n, _)| *n == number)
            .map(|(_, v)| v)
    }

    /// The effective value for a singular field: the last one on the wire.
    pub fn get(&self, number: u32) -> Option<&OptionValue> {
        self.get_all(number).last()
    }

    /// Last varint stored for `number`.
    pub fn varint(&self, number: u32) -> Option<u64> {
        match self.get(number)? {
            OptionValue::Varint(v) => Some(*v),
            _ => None,
        }
    }

    /// Last varint stored for `number`, as a bool.
    pub fn bool(&self, number: u32) -> Option<bool> {
        self.varint(number).map(|v| v != 0)
    }

    /// Last length-delimited value stored for `number`.
    pub fn bytes(&self, number: u32) -> Option<&Bytes> {
        match self.get(number)? {
            OptionValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Last length-delimited value stored for `number`, as UTF-8 text.
    pub fn string(&self, number: u32) -> Option<String> {
        self.bytes(number)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Nested message stored at `number`.
    ///
    /// Repeated occurrences of a message field merge on the wire, which for a
    /// field-keyed bag is just concatenation. Returns `Ok(None)` when nothing
    /// length-delimited is stored under `number`.
    pub fn message(&self, number: u32) -> Result<Option<OptionsBag>> {
        let mut merged = BytesMut::new();
        let mut found = false;
        for value in self.get_all(number) {
            if let OptionValue::Bytes(b) = value {
                merged.extend_from_slice(b);
                found = true;
            }
        }
        if !found {
            return Ok(None);
        }
        Self::parse(&merged).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::encoding::{encode_key, encode_varint, WireType};

    fn varint_field(buf: &mut Vec<u8>, number: u32, value: u64) {
        encode_key(number, WireType::Varint, buf);
        encode_varint(value, buf);
    }

    fn len_field(buf: &mut Vec<u8>, number: u32, value: &[u8]) {
        encode_key(number, WireType::LengthDelimited, buf);
        encode_varint(value.len() as u64, buf);
        buf.extend_from_slice(value);
    }

    #[test]
    fn test_parse_mixed_values() {
        let mut buf = Vec::new();
        varint_field(&mut buf, 50123, 1);
        len_field(&mut buf, 11, b"example.com/pkg");
        encode_key(7, WireType::ThirtyTwoBit, &mut buf);
        buf.extend_from_slice(&1.5f32.to_le_bytes());

        let bag = OptionsBag::parse(&buf).unwrap();
        assert_eq!(bag.len(), 3);
        assert_eq!(bag.bool(50123), Some(true));
        assert_eq!(bag.string(11).as_deref(), Some("example.com/pkg"));
        assert_eq!(
            bag.get(7),
            Some(&OptionValue::Fixed32(1.5f32.to_bits()))
        );
        assert!(!bag.contains(8));
    }

    #[test]
    fn test_last_value_wins() {
        let mut buf = Vec::new();
        varint_field(&mut buf, 3, 0);
        varint_field(&mut buf, 3, 1);

        let bag = OptionsBag::parse(&buf).unwrap();
        assert_eq!(bag.bool(3), Some(true));
        assert_eq!(bag.get_all(3).count(), 2);
    }

    #[test]
    fn test_nested_message_merges() {
        let mut first = Vec::new();
        varint_field(&mut first, 1, 7);
        let mut second = Vec::new();
        len_field(&mut second, 2, b"x");

        let mut buf = Vec::new();
        len_field(&mut buf, 60000, &first);
        len_field(&mut buf, 60000, &second);

        let bag = OptionsBag::parse(&buf).unwrap();
        let nested = bag.message(60000).unwrap().unwrap();
        assert_eq!(nested.varint(1), Some(7));
        assert_eq!(nested.string(2).as_deref(), Some("x"));
        assert!(bag.message(1).unwrap().is_none());
    }

    #[test]
    fn test_type_mismatch_is_absent() {
        let mut buf = Vec::new();
        len_field(&mut buf, 3, b"not a varint");
        let bag = OptionsBag::parse(&buf).unwrap();
        assert_eq!(bag.bool(3), None);
    }

    #[test]
    fn test_malformed_options() {
        assert!(OptionsBag::parse(&[0x0A, 0x05, b'a']).is_err());
        assert!(OptionsBag::parse(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_group_fields_are_skipped() {
        let mut buf = Vec::new();
        varint_field(&mut buf, 3, 1);
        encode_key(50000, WireType::StartGroup, &mut buf);
        varint_field(&mut buf, 1, 9);
        encode_key(50000, WireType::EndGroup, &mut buf);
        len_field(&mut buf, 11, b"example.com/pkg");

        let bag = OptionsBag::parse(&buf).unwrap();
        assert_eq!(bag.len(), 2);
        assert!(!bag.contains(50000));
        assert_eq!(bag.bool(3), Some(true));
        assert_eq!(bag.string(11).as_deref(), Some("example.com/pkg"));
    }
}
