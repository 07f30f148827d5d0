//! Descriptor record types.
//!
//! Hand-written prost messages mirroring `google/protobuf/descriptor.proto`,
//! restricted to what schema recovery needs. Field numbers match the upstream
//! schema exactly, so prost decodes the embedded records directly.
//!
//! Every `options` field is kept as raw bytes rather than a typed message:
//! custom options live there as extension fields that no compiled-in type
//! knows about. [`OptionsBag`] turns those bytes into a field-number keyed
//! lookup table.

use crate::options::OptionsBag;
use bytes::Bytes;
use prost::Message;
use tracing::warn;

pub use prost_types::field_descriptor_proto::{Label, Type};

/// One source file: the unit the scanner finds and the renderer emits.
#[derive(Clone, PartialEq, Message)]
pub struct FileDescriptor {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub package: Option<String>,
    #[prost(string, repeated, tag = "3")]
    pub dependency: Vec<String>,
    #[prost(int32, repeated, packed = "false", tag = "10")]
    pub public_dependency: Vec<i32>,
    #[prost(int32, repeated, packed = "false", tag = "11")]
    pub weak_dependency: Vec<i32>,
    #[prost(message, repeated, tag = "4")]
    pub message_type: Vec<MessageDescriptor>,
    #[prost(message, repeated, tag = "5")]
    pub enum_type: Vec<EnumDescriptor>,
    #[prost(message, repeated, tag = "6")]
    pub service: Vec<ServiceDescriptor>,
    #[prost(message, repeated, tag = "7")]
    pub extension: Vec<FieldDescriptor>,
    #[prost(bytes = "bytes", optional, tag = "8")]
    pub options: Option<Bytes>,
    #[prost(string, optional, tag = "12")]
    pub syntax: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MessageDescriptor {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub field: Vec<FieldDescriptor>,
    #[prost(message, repeated, tag = "6")]
    pub extension: Vec<FieldDescriptor>,
    #[prost(message, repeated, tag = "3")]
    pub nested_type: Vec<MessageDescriptor>,
    #[prost(message, repeated, tag = "4")]
    pub enum_type: Vec<EnumDescriptor>,
    #[prost(message, repeated, tag = "5")]
    pub extension_range: Vec<ExtensionRange>,
    #[prost(message, repeated, tag = "8")]
    pub oneof_decl: Vec<OneofDescriptor>,
    #[prost(bytes = "bytes", optional, tag = "7")]
    pub options: Option<Bytes>,
    #[prost(message, repeated, tag = "9")]
    pub reserved_range: Vec<ReservedRange>,
    #[prost(string, repeated, tag = "10")]
    pub reserved_name: Vec<String>,
}

/// Extension number range; `end` is exclusive in the encoding.
#[derive(Clone, PartialEq, Message)]
pub struct ExtensionRange {
    #[prost(int32, optional, tag = "1")]
    pub start: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub end: Option<i32>,
    #[prost(bytes = "bytes", optional, tag = "3")]
    pub options: Option<Bytes>,
}

/// Reserved field number range; `end` is exclusive.
#[derive(Clone, PartialEq, Message)]
pub struct ReservedRange {
    #[prost(int32, optional, tag = "1")]
    pub start: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub end: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FieldDescriptor {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub number: Option<i32>,
    #[prost(enumeration = "Label", optional, tag = "4")]
    pub label: Option<i32>,
    #[prost(enumeration = "Type", optional, tag = "5")]
    pub r#type: Option<i32>,
    #[prost(string, optional, tag = "6")]
    pub type_name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub extendee: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub default_value: Option<String>,
    #[prost(int32, optional, tag = "9")]
    pub oneof_index: Option<i32>,
    #[prost(string, optional, tag = "10")]
    pub json_name: Option<String>,
    #[prost(bytes = "bytes", optional, tag = "8")]
    pub options: Option<Bytes>,
    #[prost(bool, optional, tag = "17")]
    pub proto3_optional: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct OneofDescriptor {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(bytes = "bytes", optional, tag = "2")]
    pub options: Option<Bytes>,
}

#[derive(Clone, PartialEq, Message)]
pub struct EnumDescriptor {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub value: Vec<EnumValueDescriptor>,
    #[prost(bytes = "bytes", optional, tag = "3")]
    pub options: Option<Bytes>,
    #[prost(message, repeated, tag = "4")]
    pub reserved_range: Vec<EnumReservedRange>,
    #[prost(string, repeated, tag = "5")]
    pub reserved_name: Vec<String>,
}

/// Reserved enum number range; unlike message ranges `end` is inclusive.
#[derive(Clone, PartialEq, Message)]
pub struct EnumReservedRange {
    #[prost(int32, optional, tag = "1")]
    pub start: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub end: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct EnumValueDescriptor {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub number: Option<i32>,
    #[prost(bytes = "bytes", optional, tag = "3")]
    pub options: Option<Bytes>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ServiceDescriptor {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub method: Vec<MethodDescriptor>,
    #[prost(bytes = "bytes", optional, tag = "3")]
    pub options: Option<Bytes>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MethodDescriptor {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub input_type: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub output_type: Option<String>,
    #[prost(bytes = "bytes", optional, tag = "4")]
    pub options: Option<Bytes>,
    #[prost(bool, optional, tag = "5")]
    pub client_streaming: Option<bool>,
    #[prost(bool, optional, tag = "6")]
    pub server_streaming: Option<bool>,
}

impl FileDescriptor {
    /// Whether the dependency at `index` is re-exported.
    pub fn is_public_dependency(&self, index: usize) -> bool {
        self.public_dependency
            .iter()
            .any(|&i| usize::try_from(i).map_or(false, |i| i == index))
    }

    /// Dependency names marked public, in declaration order.
    pub fn public_dependency_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.dependency
            .iter()
            .enumerate()
            .filter(|(i, _)| self.is_public_dependency(*i))
            .map(|(_, name)| name.as_str())
    }
}

impl FieldDescriptor {
    /// Message, enum, and group fields refer to another type by name.
    pub fn is_named_type(&self) -> bool {
        matches!(self.r#type(), Type::Message | Type::Enum | Type::Group)
    }

    /// `type_name` when this field refers to a named type and has one.
    pub fn referenced_type(&self) -> Option<&str> {
        let name = self.type_name();
        (self.is_named_type() && !name.is_empty()).then_some(name)
    }

    /// `extendee` when this field is an extension.
    pub fn extendee_name(&self) -> Option<&str> {
        let name = self.extendee();
        (!name.is_empty()).then_some(name)
    }
}

/// Parse an `options` byte field, treating malformed bytes as absent.
pub(crate) fn options_bag(options: &Option<Bytes>) -> OptionsBag {
    match options {
        None => OptionsBag::default(),
        Some(bytes) => OptionsBag::parse(bytes).unwrap_or_else(|e| {
            warn!("ignoring malformed options: {}", e);
            OptionsBag::default()
        }),
    }
}
