//! Low-level protobuf wire format reading.
//!
//! The descriptor codec itself is prost; this module only answers the
//! questions prost cannot: *why* a window failed to parse (it ended early,
//! or it is garbage), and what raw values an options message carries.
//!
//! ## Wire Format Overview
//!
//! Each protobuf field is encoded as:
//! - A varint "tag" containing the field number and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (string, bytes, embedded messages, packed repeated fields)
//! - 3, 4: START_GROUP and END_GROUP (legacy groups)
//! - 5: I32 (fixed32, sfixed32, float)

use crate::error::{Error, Result};
use crate::MAX_FIELD_NUMBER;

/// Protobuf wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    I64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    Len = 2,
    /// Start group (deprecated)
    StartGroup = 3,
    /// End group (deprecated)
    EndGroup = 4,
    /// 32-bit fixed-width
    I32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::I32),
            _ => Err(Error::invalid_wire_format(
                0,
                format!("unknown wire type: {}", value),
            )),
        }
    }
}

/// Longest legal varint encoding of a 64-bit value
const MAX_VARINT_LEN: usize = 10;

/// A single decoded field value, still untyped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawValue<'a> {
    /// VARINT payload
    Varint(u64),
    /// I64 payload, little-endian decoded
    I64(u64),
    /// LEN payload
    Len(&'a [u8]),
    /// I32 payload, little-endian decoded
    I32(u32),
}

/// A field number together with its raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawField<'a> {
    /// Field number from the tag
    pub number: u32,
    /// Undecoded payload
    pub value: RawValue<'a>,
}

/// Decode a varint from the given bytes.
///
/// Returns the decoded value and the number of bytes consumed. Running out of
/// input yields [`Error::Truncated`]; an over-long encoding yields
/// [`Error::VarintDecode`].
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(Error::varint_decode(i));
        }

        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    if data.len() >= MAX_VARINT_LEN {
        Err(Error::varint_decode(MAX_VARINT_LEN))
    } else {
        Err(Error::truncated(0))
    }
}

/// Read one complete field from the front of `data`.
///
/// Returns the field and the total bytes consumed (tag and value).
pub fn read_field(data: &[u8]) -> Result<(RawField<'_>, usize)> {
    if data.is_empty() {
        return Err(Error::truncated(0));
    }

    let (tag, tag_len) = decode_varint(data)?;

    let wire_type = WireType::try_from((tag & 0x07) as u8)?;
    let number = tag >> 3;

    if number == 0 || number > MAX_FIELD_NUMBER as u64 {
        return Err(Error::InvalidFieldNumber {
            number: u32::try_from(number).unwrap_or(u32::MAX),
            max: MAX_FIELD_NUMBER,
        });
    }
    let number = number as u32;
    let rest = &data[tag_len..];

    let (value, value_len) = match wire_type {
        WireType::Varint => {
            let (v, len) = decode_varint(rest).map_err(|e| match e {
                Error::Truncated { .. } => Error::truncated(0),
                other => other.offset_by(tag_len),
            })?;
            (RawValue::Varint(v), len)
        }
        WireType::I64 => {
            let bytes: [u8; 8] = rest
                .get(..8)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| Error::truncated(0))?;
            (RawValue::I64(u64::from_le_bytes(bytes)), 8)
        }
        WireType::Len => {
            let (length, prefix_len) = decode_varint(rest).map_err(|e| match e {
                Error::Truncated { .. } => Error::truncated(0),
                other => other.offset_by(tag_len),
            })?;
            let available = rest.len() - prefix_len;
            let length = usize::try_from(length).unwrap_or(usize::MAX);
            if length > available {
                return Err(Error::truncated(0));
            }
            let payload = &rest[prefix_len..prefix_len + length];
            (RawValue::Len(payload), prefix_len + length)
        }
        WireType::I32 => {
            let bytes: [u8; 4] = rest
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| Error::truncated(0))?;
            (RawValue::I32(u32::from_le_bytes(bytes)), 4)
        }
        WireType::StartGroup | WireType::EndGroup => {
            return Err(Error::invalid_wire_format(
                0,
                "group wire types are not supported",
            ));
        }
    };

    Ok((RawField { number, value }, tag_len + value_len))
}

/// Consume a single protobuf field from the data.
///
/// Returns the field number and total bytes consumed (including tag and value).
pub fn consume_field(data: &[u8]) -> Result<(u32, usize)> {
    read_field(data).map(|(field, len)| (field.number, len))
}

/// Walk the top-level fields of a candidate record.
///
/// Succeeds with the number of fields when `data` is an exact sequence of
/// complete fields. Fails with [`Error::Truncated`] when the last field runs
/// past the end of `data`, and with another error when the bytes are not a
/// protobuf message at all.
pub fn probe_record(data: &[u8]) -> Result<usize> {
    let mut position = 0;
    let mut fields = 0;

    while position < data.len() {
        let (_, len) = consume_field(&data[position..]).map_err(|e| e.offset_by(position))?;
        position += len;
        fields += 1;
    }

    Ok(fields)
}

/// Length of a group field at the front of `data`, tags included.
///
/// Returns `None` when the first field is not a `StartGroup`. Nested groups
/// are walked with an explicit stack; the group must be closed by an
/// `EndGroup` with the same field number.
pub fn group_len(data: &[u8]) -> Result<Option<usize>> {
    let (tag, tag_len) = decode_varint(data)?;
    if WireType::try_from((tag & 0x07) as u8)? != WireType::StartGroup {
        return Ok(None);
    }

    let mut open = vec![tag >> 3];
    let mut position = tag_len;

    while let Some(&innermost) = open.last() {
        let rest = &data[position..];
        if rest.is_empty() {
            return Err(Error::truncated(position));
        }

        let (tag, tag_len) = decode_varint(rest).map_err(|e| e.offset_by(position))?;
        let wire_type =
            WireType::try_from((tag & 0x07) as u8).map_err(|e| e.offset_by(position))?;
        let number = tag >> 3;

        match wire_type {
            WireType::StartGroup => {
                open.push(number);
                position += tag_len;
            }
            WireType::EndGroup if number == innermost => {
                open.pop();
                position += tag_len;
            }
            WireType::EndGroup => {
                return Err(Error::invalid_wire_format(
                    position,
                    format!("group {} closed by end of group {}", innermost, number),
                ));
            }
            _ => {
                let (_, len) = read_field(rest).map_err(|e| e.offset_by(position))?;
                position += len;
            }
        }
    }

    Ok(Some(position))
}

/// Iterator over the fields of a message payload.
///
/// Group-encoded fields are stepped over without being yielded. Yields an
/// error once and then stops if the payload is malformed.
pub fn fields(data: &[u8]) -> Fields<'_> {
    Fields {
        data,
        position: 0,
        failed: false,
    }
}

/// See [`fields`].
#[derive(Debug, Clone)]
pub struct Fields<'a> {
    data: &'a [u8],
    position: usize,
    failed: bool,
}

impl<'a> Iterator for Fields<'a> {
    type Item = Result<RawField<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed || self.position >= self.data.len() {
                return None;
            }

            match group_len(&self.data[self.position..]) {
                Ok(Some(len)) => self.position += len,
                Ok(None) => break,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e.offset_by(self.position)));
                }
            }
        }

        match read_field(&self.data[self.position..]) {
            Ok((field, len)) => {
                self.position += len;
                Some(Ok(field))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e.offset_by(self.position)))
            }
        }
    }
}
