//! Option rendering: well-known options by field number, custom options by
//! matching visible extension declarations.

use super::{escape_bytes, quote, FilePrinter};
use crate::descriptor::{options_bag, FieldDescriptor, Label, Type};
use crate::link::Declaration;
use crate::options::{OptionValue, OptionsBag};
use bytes::Bytes;
use tracing::warn;

/// Which options message a bag came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum OptionsKind {
    File,
    Message,
    Field,
    Enum,
    EnumValue,
    Service,
    Method,
}

impl OptionsKind {
    /// Extendee name custom options of this kind are declared against.
    fn type_name(self) -> &'static str {
        match self {
            OptionsKind::File => ".google.protobuf.FileOptions",
            OptionsKind::Message => ".google.protobuf.MessageOptions",
            OptionsKind::Field => ".google.protobuf.FieldOptions",
            OptionsKind::Enum => ".google.protobuf.EnumOptions",
            OptionsKind::EnumValue => ".google.protobuf.EnumValueOptions",
            OptionsKind::Service => ".google.protobuf.ServiceOptions",
            OptionsKind::Method => ".google.protobuf.MethodOptions",
        }
    }

    fn known(self) -> &'static [KnownOption] {
        match self {
            OptionsKind::File => FILE_OPTIONS,
            OptionsKind::Message => MESSAGE_OPTIONS,
            OptionsKind::Field => FIELD_OPTIONS,
            OptionsKind::Enum => ENUM_OPTIONS,
            OptionsKind::EnumValue => ENUM_VALUE_OPTIONS,
            OptionsKind::Service => SERVICE_OPTIONS,
            OptionsKind::Method => METHOD_OPTIONS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ValueKind {
    Bool,
    String,
    Enum(&'static [(u64, &'static str)]),
}

#[derive(Debug)]
struct KnownOption {
    name: &'static str,
    number: u32,
    kind: ValueKind,
}

impl KnownOption {
    const fn new(name: &'static str, number: u32, kind: ValueKind) -> Self {
        Self { name, number, kind }
    }

    fn render(&self, bag: &OptionsBag) -> Option<String> {
        match self.kind {
            ValueKind::Bool => bag.bool(self.number).map(|b| b.to_string()),
            ValueKind::String => bag.string(self.number).map(|s| quote(&s)),
            ValueKind::Enum(table) => bag.varint(self.number).map(|v| {
                table
                    .iter()
                    .find(|(number, _)| *number == v)
                    .map(|(_, name)| name.to_string())
                    .unwrap_or_else(|| v.to_string())
            }),
        }
    }
}

const OPTIMIZE_MODE: &[(u64, &str)] = &[(1, "SPEED"), (2, "CODE_SIZE"), (3, "LITE_RUNTIME")];
const CTYPE: &[(u64, &str)] = &[(0, "STRING"), (1, "CORD"), (2, "STRING_PIECE")];
const JSTYPE: &[(u64, &str)] = &[(0, "JS_NORMAL"), (1, "JS_STRING"), (2, "JS_NUMBER")];
const IDEMPOTENCY_LEVEL: &[(u64, &str)] = &[
    (0, "IDEMPOTENCY_UNKNOWN"),
    (1, "NO_SIDE_EFFECTS"),
    (2, "IDEMPOTENT"),
];

const FILE_OPTIONS: &[KnownOption] = &[
    KnownOption::new("deprecated", 23, ValueKind::Bool),
    KnownOption::new("optimize_for", 9, ValueKind::Enum(OPTIMIZE_MODE)),
    KnownOption::new("cc_generic_services", 16, ValueKind::Bool),
    KnownOption::new("go_package", 11, ValueKind::String),
    KnownOption::new("java_package", 1, ValueKind::String),
    KnownOption::new("java_outer_classname", 8, ValueKind::String),
    KnownOption::new("java_generate_equals_and_hash", 20, ValueKind::Bool),
    KnownOption::new("java_generic_services", 17, ValueKind::Bool),
    KnownOption::new("java_multiple_files", 10, ValueKind::Bool),
    KnownOption::new("java_string_check_utf8", 27, ValueKind::Bool),
    KnownOption::new("py_generic_services", 18, ValueKind::Bool),
    KnownOption::new("cc_enable_arenas", 31, ValueKind::Bool),
    KnownOption::new("objc_class_prefix", 36, ValueKind::String),
    KnownOption::new("csharp_namespace", 37, ValueKind::String),
    KnownOption::new("swift_prefix", 39, ValueKind::String),
    KnownOption::new("php_class_prefix", 40, ValueKind::String),
    KnownOption::new("php_namespace", 41, ValueKind::String),
    KnownOption::new("php_metadata_namespace", 44, ValueKind::String),
    KnownOption::new("ruby_package", 45, ValueKind::String),
];

const MESSAGE_OPTIONS: &[KnownOption] = &[
    KnownOption::new("message_set_wire_format", 1, ValueKind::Bool),
    KnownOption::new("no_standard_descriptor_accessor", 2, ValueKind::Bool),
    KnownOption::new("deprecated", 3, ValueKind::Bool),
];

const FIELD_OPTIONS: &[KnownOption] = &[
    KnownOption::new("ctype", 1, ValueKind::Enum(CTYPE)),
    KnownOption::new("deprecated", 3, ValueKind::Bool),
    KnownOption::new("lazy", 5, ValueKind::Bool),
    KnownOption::new("jstype", 6, ValueKind::Enum(JSTYPE)),
    KnownOption::new("packed", 2, ValueKind::Bool),
    KnownOption::new("weak", 10, ValueKind::Bool),
    KnownOption::new("experimental_map_key", 9, ValueKind::String),
];

const ENUM_OPTIONS: &[KnownOption] = &[
    KnownOption::new("allow_alias", 2, ValueKind::Bool),
    KnownOption::new("deprecated", 3, ValueKind::Bool),
];

const ENUM_VALUE_OPTIONS: &[KnownOption] = &[KnownOption::new("deprecated", 1, ValueKind::Bool)];

const SERVICE_OPTIONS: &[KnownOption] = &[KnownOption::new("deprecated", 33, ValueKind::Bool)];

const METHOD_OPTIONS: &[KnownOption] = &[
    KnownOption::new("deprecated", 33, ValueKind::Bool),
    KnownOption::new("idempotency_level", 34, ValueKind::Enum(IDEMPOTENCY_LEVEL)),
];

impl FilePrinter<'_, '_, '_> {
    /// All options set in `raw`, as `(key, literal)` pairs: well-known ones
    /// first, then custom ones in declaration order.
    pub(super) fn options(&self, kind: OptionsKind, raw: &Option<Bytes>) -> Vec<(String, String)> {
        let bag = options_bag(raw);
        if bag.is_empty() {
            return Vec::new();
        }

        let mut out: Vec<(String, String)> = kind
            .known()
            .iter()
            .filter_map(|option| {
                option
                    .render(&bag)
                    .map(|value| (option.name.to_string(), value))
            })
            .collect();

        let graph = self.graph();
        for node in graph.types() {
            let Some(owner) = node.owner() else {
                continue;
            };
            if !self.visible.contains(&owner) {
                continue;
            }
            let Some(Declaration::Field(extension)) = node.declaration() else {
                continue;
            };
            if extension.extendee() != kind.type_name() {
                continue;
            }
            self.option_field(extension, &bag, None, &mut out);
        }

        out
    }

    /// Render `field` out of `bag`. Top-level custom options are keyed
    /// `(name)`, fields of message-typed options `(name).sub`.
    fn option_field(
        &self,
        field: &FieldDescriptor,
        bag: &OptionsBag,
        parent: Option<&str>,
        out: &mut Vec<(String, String)>,
    ) {
        let Ok(number) = u32::try_from(field.number()) else {
            return;
        };
        if !bag.contains(number) {
            return;
        }

        let key = match parent {
            None => format!("({})", field.name()),
            Some(parent) => format!("{}.{}", parent, field.name()),
        };

        let values: Vec<&OptionValue> = if field.label() == Label::Repeated {
            bag.get_all(number).collect()
        } else {
            bag.get(number).into_iter().collect()
        };

        let declaration = field
            .referenced_type()
            .and_then(|name| self.graph().declaration(name));

        match declaration {
            Some(Declaration::Enum(enum_type)) => {
                for value in values {
                    let OptionValue::Varint(raw) = value else {
                        continue;
                    };
                    let enum_number = *raw as i32;
                    let name = enum_type
                        .value
                        .iter()
                        .find(|v| v.number() == enum_number)
                        .map(|v| v.name().to_string())
                        .unwrap_or_else(|| enum_number.to_string());
                    out.push((key.clone(), name));
                }
            }
            Some(Declaration::Message(message)) => match bag.message(number) {
                Ok(Some(nested)) => {
                    for sub_field in &message.field {
                        self.option_field(sub_field, &nested, Some(&key), out);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("malformed value for option {}: {}", key, e),
            },
            Some(_) => {}
            None => {
                for value in values {
                    if let Some(literal) = scalar_literal(field.r#type(), value) {
                        out.push((key.clone(), literal));
                    }
                }
            }
        }
    }
}

/// Format a scalar option value according to its declared type.
fn scalar_literal(ty: Type, value: &OptionValue) -> Option<String> {
    let literal = match (ty, value) {
        (Type::Bool, OptionValue::Varint(v)) => (*v != 0).to_string(),
        (Type::Int32, OptionValue::Varint(v)) => (*v as i32).to_string(),
        (Type::Int64, OptionValue::Varint(v)) => (*v as i64).to_string(),
        (Type::Uint32, OptionValue::Varint(v)) => (*v as u32).to_string(),
        (Type::Uint64, OptionValue::Varint(v)) => v.to_string(),
        (Type::Sint32, OptionValue::Varint(v)) => {
            let v = *v as u32;
            (((v >> 1) as i32) ^ -((v & 1) as i32)).to_string()
        }
        (Type::Sint64, OptionValue::Varint(v)) => {
            (((v >> 1) as i64) ^ -((v & 1) as i64)).to_string()
        }
        (Type::Fixed32, OptionValue::Fixed32(v)) => v.to_string(),
        (Type::Sfixed32, OptionValue::Fixed32(v)) => (*v as i32).to_string(),
        (Type::Float, OptionValue::Fixed32(v)) => float_literal(f32::from_bits(*v)),
        (Type::Fixed64, OptionValue::Fixed64(v)) => v.to_string(),
        (Type::Sfixed64, OptionValue::Fixed64(v)) => (*v as i64).to_string(),
        (Type::Double, OptionValue::Fixed64(v)) => float_literal(f64::from_bits(*v)),
        (Type::String, OptionValue::Bytes(b)) => quote(&String::from_utf8_lossy(b)),
        (Type::Bytes, OptionValue::Bytes(b)) => format!("\"{}\"", escape_bytes(b)),
        _ => return None,
    };
    Some(literal)
}

fn float_literal<F: Into<f64> + Copy + std::fmt::Display>(value: F) -> String {
    let wide: f64 = value.into();
    if wide.is_nan() {
        "nan".to_string()
    } else if wide.is_infinite() {
        let sign = if wide > 0.0 { "" } else { "-" };
        format!("{}inf", sign)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_literals() {
        assert_eq!(
            scalar_literal(Type::Int32, &OptionValue::Varint(u64::MAX)).as_deref(),
            Some("-1")
        );
        assert_eq!(
            scalar_literal(Type::Sint32, &OptionValue::Varint(3)).as_deref(),
            Some("-2")
        );
        assert_eq!(
            scalar_literal(Type::Sint64, &OptionValue::Varint(4)).as_deref(),
            Some("2")
        );
        assert_eq!(
            scalar_literal(Type::Sfixed32, &OptionValue::Fixed32(u32::MAX)).as_deref(),
            Some("-1")
        );
        assert_eq!(
            scalar_literal(Type::Float, &OptionValue::Fixed32(1.5f32.to_bits())).as_deref(),
            Some("1.5")
        );
        assert_eq!(
            scalar_literal(Type::Double, &OptionValue::Fixed64(f64::NEG_INFINITY.to_bits()))
                .as_deref(),
            Some("-inf")
        );
        assert_eq!(
            scalar_literal(Type::Bytes, &OptionValue::Bytes(Bytes::from_static(b"a\x01\"")))
                .as_deref(),
            Some("\"a\\001\\\"\"")
        );
    }

    #[test]
    fn test_mismatched_wire_type_is_skipped() {
        assert_eq!(scalar_literal(Type::Bool, &OptionValue::Fixed32(1)), None);
        assert_eq!(
            scalar_literal(Type::String, &OptionValue::Varint(1)),
            None
        );
    }

    #[test]
    fn test_known_enum_option_falls_back_to_number() {
        let option = KnownOption::new("optimize_for", 9, ValueKind::Enum(OPTIMIZE_MODE));
        let bag = OptionsBag::parse(&[0x48, 0x03]).unwrap();
        assert_eq!(option.render(&bag).as_deref(), Some("LITE_RUNTIME"));

        let bag = OptionsBag::parse(&[0x48, 0x07]).unwrap();
        assert_eq!(option.render(&bag).as_deref(), Some("7"));
    }
}
