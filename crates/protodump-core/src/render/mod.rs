//! `.proto` text generation from a linked [`SymbolGraph`].
//!
//! ## Layout
//!
//! Each file renders as imports, package, file options, file-level `extend`
//! blocks, enums, messages and services, in that order, indented with one
//! [`RenderConfig::indent`] per nesting level.
//!
//! Two things in the output are not stored verbatim in a record:
//!
//! - imports needed because an extension visible to the file extends one of
//!   the file's own types;
//! - custom options, which only exist as numbered fields in an options
//!   message and are recovered by matching them against the extension
//!   declarations the file can see (see the `options` submodule).

mod options;

use crate::descriptor::{
    EnumDescriptor, FieldDescriptor, FileDescriptor, Label, MessageDescriptor, ServiceDescriptor,
    Type,
};
use crate::error::{Error, Result};
use crate::link::{Declaration, SymbolGraph};
use crate::sink::ProtoSink;
use crate::MAX_FIELD_NUMBER;
use options::OptionsKind;
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as FmtWrite;
use tracing::debug;

/// Configuration for rendering
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Indentation unit for one nesting level (default: one tab)
    pub indent: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            indent: "\t".to_string(),
        }
    }
}

impl RenderConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the indentation unit
    pub fn indent(mut self, s: impl Into<String>) -> Self {
        self.indent = s.into();
        self
    }
}

/// A rendered `.proto` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    /// File name, as recorded in the descriptor
    pub name: String,
    /// `.proto` source text
    pub text: String,
}

/// One `import` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Imported file name
    pub name: String,
    /// `import public`
    pub public: bool,
}

/// Renders the records of a linked graph.
#[derive(Debug)]
pub struct Renderer<'g, 'a> {
    graph: &'g SymbolGraph<'a>,
    config: RenderConfig,
}

impl<'g, 'a> Renderer<'g, 'a> {
    /// Creates a renderer with default configuration
    pub fn new(graph: &'g SymbolGraph<'a>) -> Self {
        Self {
            graph,
            config: RenderConfig::default(),
        }
    }

    /// Replaces the configuration
    pub fn with_config(mut self, config: RenderConfig) -> Self {
        self.config = config;
        self
    }

    /// Render the record at `index`.
    pub fn render_file(&self, index: usize) -> Result<RenderedFile> {
        let record = self
            .graph
            .records()
            .get(index)
            .ok_or_else(|| Error::internal(format!("no record at index {}", index)))?;

        let mut printer = FilePrinter::new(self, index, record);
        printer.write_file()?;

        debug!("rendered '{}' ({} bytes)", record.name(), printer.out.len());
        Ok(RenderedFile {
            name: record.name().to_string(),
            text: printer.out,
        })
    }

    /// Render every record, in collection order.
    pub fn render_all(&self) -> Result<Vec<RenderedFile>> {
        (0..self.graph.records().len())
            .map(|index| self.render_file(index))
            .collect()
    }

    /// Render every record into `sink`, returning the number written.
    pub fn dump_files<S: ProtoSink + ?Sized>(&self, sink: &mut S) -> Result<usize> {
        let count = self.graph.records().len();
        for index in 0..count {
            let file = self.render_file(index)?;
            sink.write_proto(&file.name, &file.text)?;
        }
        Ok(count)
    }

    /// Imports of the record at `index`: its own dependencies, then files
    /// whose visible extensions extend a type this record declares.
    pub fn imports(&self, index: usize) -> Result<Vec<Import>> {
        let graph = self.graph;
        let record = graph
            .records()
            .get(index)
            .ok_or_else(|| Error::internal(format!("no record at index {}", index)))?;

        let mut imports: Vec<Import> = record
            .dependency
            .iter()
            .enumerate()
            .map(|(i, name)| Import {
                name: name.clone(),
                public: record.is_public_dependency(i),
            })
            .collect();
        let mut seen: HashSet<&str> = record.dependency.iter().map(String::as_str).collect();

        let closure = graph.public_dependencies(index);
        for node in graph.types() {
            let (Some(owner), Some(Declaration::Field(field))) = (node.owner(), node.declaration())
            else {
                continue;
            };
            if !closure.contains(&owner) {
                continue;
            }
            let Some(extendee) = field.extendee_name() else {
                continue;
            };
            let extends_this_file =
                graph.type_node(extendee).and_then(|target| target.owner()) == Some(index);
            if !extends_this_file {
                continue;
            }

            let owner_name = graph.records()[owner].name();
            if seen.insert(owner_name) {
                imports.push(Import {
                    name: owner_name.to_string(),
                    public: false,
                });
            }
        }

        Ok(imports)
    }
}

/// Text writer for one file.
struct FilePrinter<'r, 'g, 'a> {
    renderer: &'r Renderer<'g, 'a>,
    index: usize,
    record: &'a FileDescriptor,
    /// Records whose extensions may supply custom options
    visible: BTreeSet<usize>,
    out: String,
    indent_level: usize,
}

impl<'r, 'g, 'a> FilePrinter<'r, 'g, 'a> {
    fn new(renderer: &'r Renderer<'g, 'a>, index: usize, record: &'a FileDescriptor) -> Self {
        let mut visible = renderer.graph.public_dependencies(index).clone();
        visible.insert(index);
        Self {
            renderer,
            index,
            record,
            visible,
            out: String::new(),
            indent_level: 0,
        }
    }

    fn graph(&self) -> &'g SymbolGraph<'a> {
        self.renderer.graph
    }

    fn indent(&mut self) {
        self.indent_level += 1;
    }

    fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    fn write_indent(&mut self) -> Result<()> {
        for _ in 0..self.indent_level {
            self.out.push_str(&self.renderer.config.indent);
        }
        Ok(())
    }

    fn writeln(&mut self, s: &str) -> Result<()> {
        self.write_indent()?;
        writeln!(self.out, "{}", s)?;
        Ok(())
    }

    fn write_option_statements(&mut self, options: &[(String, String)]) -> Result<()> {
        for (key, value) in options {
            self.write_indent()?;
            writeln!(self.out, "option {} = {};", key, value)?;
        }
        Ok(())
    }

    fn write_file(&mut self) -> Result<()> {
        let record = self.record;

        let imports = self.renderer.imports(self.index)?;
        for import in &imports {
            let modifier = if import.public { "public " } else { "" };
            writeln!(self.out, "import {}\"{}\";", modifier, import.name)?;
        }
        if !imports.is_empty() {
            writeln!(self.out)?;
        }

        if !record.package().is_empty() {
            writeln!(self.out, "package {};", record.package())?;
            writeln!(self.out)?;
        }

        let options = self.options(OptionsKind::File, &record.options);
        self.write_option_statements(&options)?;
        if !options.is_empty() {
            writeln!(self.out)?;
        }

        self.write_extensions(&record.extension)?;

        for enum_type in &record.enum_type {
            self.write_enum(enum_type)?;
        }

        for message in &record.message_type {
            self.write_message(message)?;
        }

        for service in &record.service {
            self.write_service(service)?;
        }

        Ok(())
    }

    /// `extend` blocks, one per extendee, in order of first appearance.
    fn write_extensions(&mut self, fields: &'a [FieldDescriptor]) -> Result<()> {
        let mut groups: Vec<(&str, Vec<&'a FieldDescriptor>)> = Vec::new();
        for field in fields {
            let extendee = field.extendee();
            match groups.iter_mut().find(|(key, _)| *key == extendee) {
                Some((_, group)) => group.push(field),
                None => groups.push((extendee, vec![field])),
            }
        }

        for (extendee, group) in groups {
            if extendee.is_empty() {
                return Err(Error::EmptyExtendee {
                    file: self.record.name().to_string(),
                });
            }

            self.write_indent()?;
            writeln!(self.out, "extend {} {{", extendee)?;
            self.indent();
            for field in group {
                let declaration = self.field_declaration(field, true);
                self.writeln(&declaration)?;
            }
            self.dedent();
            self.writeln("}")?;
            writeln!(self.out)?;
        }

        Ok(())
    }

    fn write_message(&mut self, message: &'a MessageDescriptor) -> Result<()> {
        self.write_indent()?;
        writeln!(self.out, "message {} {{", message.name())?;
        self.indent();

        let options = self.options(OptionsKind::Message, &message.options);
        self.write_option_statements(&options)?;

        self.write_reserved(message)?;

        for nested in &message.nested_type {
            self.write_message(nested)?;
        }

        for enum_type in &message.enum_type {
            self.write_enum(enum_type)?;
        }

        for field in message.field.iter().filter(|f| !in_real_oneof(f)) {
            let declaration = self.field_declaration(field, true);
            self.writeln(&declaration)?;
        }

        for (i, oneof) in message.oneof_decl.iter().enumerate() {
            let members: Vec<&FieldDescriptor> = message
                .field
                .iter()
                .filter(|f| f.oneof_index == Some(i as i32))
                .collect();

            // proto3 `optional` fields live in a synthetic oneof of their own
            if !members.is_empty() && members.iter().all(|f| f.proto3_optional()) {
                continue;
            }

            self.write_indent()?;
            writeln!(self.out, "oneof {} {{", oneof.name())?;
            self.indent();
            for field in members {
                let declaration = self.field_declaration(field, false);
                self.writeln(&declaration)?;
            }
            self.dedent();
            self.writeln("}")?;
        }

        self.write_extensions(&message.extension)?;

        if !message.extension_range.is_empty() {
            writeln!(self.out)?;
        }
        for range in &message.extension_range {
            self.write_indent()?;
            let end = if range.end() >= MAX_FIELD_NUMBER as i32 {
                "max".to_string()
            } else {
                range.end().to_string()
            };
            writeln!(self.out, "extensions {} to {};", range.start(), end)?;
        }

        self.dedent();
        self.writeln("}")?;
        writeln!(self.out)?;

        Ok(())
    }

    fn write_reserved(&mut self, message: &MessageDescriptor) -> Result<()> {
        if !message.reserved_range.is_empty() {
            let ranges: Vec<String> = message
                .reserved_range
                .iter()
                .map(|range| {
                    // Message reserved ranges are end-exclusive
                    let last = range.end() - 1;
                    if range.start() == last {
                        range.start().to_string()
                    } else if last >= MAX_FIELD_NUMBER as i32 {
                        format!("{} to max", range.start())
                    } else {
                        format!("{} to {}", range.start(), last)
                    }
                })
                .collect();
            self.writeln(&format!("reserved {};", ranges.join(", ")))?;
        }

        if !message.reserved_name.is_empty() {
            self.writeln(&format!("reserved {};", quoted_names(&message.reserved_name)))?;
        }

        Ok(())
    }

    fn write_enum(&mut self, enum_type: &'a EnumDescriptor) -> Result<()> {
        self.write_indent()?;
        writeln!(self.out, "enum {} {{", enum_type.name())?;
        self.indent();

        let options = self.options(OptionsKind::Enum, &enum_type.options);
        self.write_option_statements(&options)?;

        if !enum_type.reserved_range.is_empty() {
            let ranges: Vec<String> = enum_type
                .reserved_range
                .iter()
                .map(|range| {
                    if range.start() == range.end() {
                        range.start().to_string()
                    } else if range.end() == i32::MAX {
                        format!("{} to max", range.start())
                    } else {
                        format!("{} to {}", range.start(), range.end())
                    }
                })
                .collect();
            self.writeln(&format!("reserved {};", ranges.join(", ")))?;
        }

        if !enum_type.reserved_name.is_empty() {
            self.writeln(&format!("reserved {};", quoted_names(&enum_type.reserved_name)))?;
        }

        for value in &enum_type.value {
            let options = self.options(OptionsKind::EnumValue, &value.options);
            self.write_indent()?;
            writeln!(
                self.out,
                "{} = {}{};",
                value.name(),
                value.number(),
                option_list(&options)
            )?;
        }

        self.dedent();
        self.writeln("}")?;
        writeln!(self.out)?;

        Ok(())
    }

    fn write_service(&mut self, service: &'a ServiceDescriptor) -> Result<()> {
        self.write_indent()?;
        writeln!(self.out, "service {} {{", service.name())?;
        self.indent();

        let options = self.options(OptionsKind::Service, &service.options);
        self.write_option_statements(&options)?;

        for method in &service.method {
            let input_stream = if method.client_streaming() { "stream " } else { "" };
            let output_stream = if method.server_streaming() { "stream " } else { "" };

            self.write_indent()?;
            write!(
                self.out,
                "rpc {} ({}{}) returns ({}{})",
                method.name(),
                input_stream,
                method.input_type(),
                output_stream,
                method.output_type()
            )?;

            let options = self.options(OptionsKind::Method, &method.options);
            if options.is_empty() {
                writeln!(self.out, ";")?;
            } else {
                writeln!(self.out, " {{")?;
                self.indent();
                self.write_option_statements(&options)?;
                self.dedent();
                self.writeln("}")?;
            }
        }

        self.dedent();
        self.writeln("}")?;
        writeln!(self.out)?;

        Ok(())
    }

    /// `[label] type name = number [options];`
    fn field_declaration(&self, field: &FieldDescriptor, emit_label: bool) -> String {
        let mut options = Vec::new();

        if let Some(default) = self.default_value(field) {
            options.push(("default".to_string(), default));
        }

        if let Some(json_name) = field.json_name.as_deref() {
            if json_name != to_lower_camel_case(field.name()) {
                options.push(("json_name".to_string(), quote(json_name)));
            }
        }

        options.extend(self.options(OptionsKind::Field, &field.options));

        let label = if emit_label {
            format!("{} ", label_keyword(field.label()))
        } else {
            String::new()
        };

        format!(
            "{}{} {} = {}{};",
            label,
            field_type_name(field),
            field.name(),
            field.number(),
            option_list(&options)
        )
    }

    /// Explicit default, or the first value of a singular enum field's type.
    fn default_value(&self, field: &FieldDescriptor) -> Option<String> {
        if let Some(default) = field.default_value.as_deref().filter(|d| !d.is_empty()) {
            return Some(match field.r#type() {
                Type::String => quote(default),
                // Already C-escaped in the descriptor
                Type::Bytes => format!("\"{}\"", default),
                _ => default.to_string(),
            });
        }

        if field.r#type() == Type::Enum && field.label() != Label::Repeated {
            if let Some(Declaration::Enum(enum_type)) = self.graph().declaration(field.type_name()) {
                return enum_type.value.first().map(|value| value.name().to_string());
            }
        }

        None
    }
}

fn in_real_oneof(field: &FieldDescriptor) -> bool {
    field.oneof_index.is_some() && !field.proto3_optional()
}

fn label_keyword(label: Label) -> &'static str {
    match label {
        Label::Required => "required",
        Label::Repeated => "repeated",
        Label::Optional => "optional",
    }
}

/// Referenced type name for named types, the scalar keyword otherwise.
fn field_type_name(field: &FieldDescriptor) -> String {
    match field.r#type() {
        Type::Message | Type::Enum | Type::Group => field.type_name().to_string(),
        scalar => scalar_keyword(scalar).to_string(),
    }
}

fn scalar_keyword(ty: Type) -> &'static str {
    match ty {
        Type::Double => "double",
        Type::Float => "float",
        Type::Int64 => "int64",
        Type::Uint64 => "uint64",
        Type::Int32 => "int32",
        Type::Fixed64 => "fixed64",
        Type::Fixed32 => "fixed32",
        Type::Bool => "bool",
        Type::String => "string",
        Type::Bytes => "bytes",
        Type::Uint32 => "uint32",
        Type::Sfixed32 => "sfixed32",
        Type::Sfixed64 => "sfixed64",
        Type::Sint32 => "sint32",
        Type::Sint64 => "sint64",
        Type::Group => "group",
        Type::Message => "message",
        Type::Enum => "enum",
    }
}

/// ` [a = 1, b = 2]`, or nothing.
fn option_list(options: &[(String, String)]) -> String {
    if options.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = options
        .iter()
        .map(|(key, value)| format!("{} = {}", key, value))
        .collect();
    format!(" [{}]", parts.join(", "))
}

fn quoted_names(names: &[String]) -> String {
    names
        .iter()
        .map(|name| quote(name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn quote(s: &str) -> String {
    format!("\"{}\"", escape_string(s))
}

/// Escape a string for proto syntax
fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ if c.is_ascii_control() => {
                result.push_str(&format!("\\x{:02x}", c as u8));
            }
            _ => result.push(c),
        }
    }
    result
}

/// Escape raw bytes: printable ASCII as-is, everything else as octal
fn escape_bytes(bytes: &[u8]) -> String {
    let mut result = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\\' => result.push_str("\\\\"),
            b'"' => result.push_str("\\\""),
            0x20..=0x7E => result.push(b as char),
            _ => result.push_str(&format!("\\{:03o}", b)),
        }
    }
    result
}

/// Convert a snake_case name to lowerCamelCase
fn to_lower_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = false;

    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}
