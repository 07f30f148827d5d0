//! Cross-file linking of collected descriptor records.
//!
//! [`analyze`] turns the flat list of records into a [`SymbolGraph`]:
//!
//! 1. Every record becomes a file node. Every type a record declares
//!    (messages, enums, services, extension fields) completes a type node;
//!    every type it only refers to (field types, extendees, method inputs and
//!    outputs) creates or reuses a placeholder node.
//! 2. Dependency names are resolved against the collected files. Names in
//!    the `google` namespace are assumed to exist and are skipped.
//! 3. If any dependency or type is still unresolved, analysis fails with the
//!    full list of offending names.
//! 4. Otherwise each file's public closure is computed: its direct imports,
//!    plus whatever those re-export through `import public`, transitively.
//!
//! The graph borrows the records and is read-only once built.

use crate::descriptor::{
    EnumDescriptor, FieldDescriptor, FileDescriptor, MessageDescriptor, ServiceDescriptor,
};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Dependencies in this namespace are never required to be collected.
const RESERVED_DEPENDENCY_PREFIX: &str = "google";

/// Index of a file node in [`SymbolGraph::files`].
pub type FileId = usize;

/// Index of a type node in [`SymbolGraph::types`].
pub type TypeId = usize;

/// The declaration behind a defined type node.
#[derive(Debug, Clone, Copy)]
pub enum Declaration<'a> {
    /// A message type
    Message(&'a MessageDescriptor),
    /// An enum type
    Enum(&'a EnumDescriptor),
    /// An extension field
    Field(&'a FieldDescriptor),
    /// A service
    Service(&'a ServiceDescriptor),
}

/// A fully-qualified type name and, once declared, what declares it.
#[derive(Debug, Clone)]
pub struct TypeNode<'a> {
    name: String,
    owner: Option<usize>,
    declaration: Option<Declaration<'a>>,
}

impl<'a> TypeNode<'a> {
    /// Fully-qualified name, `.package.Name` form
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the declaring record
    pub fn owner(&self) -> Option<usize> {
        self.owner
    }

    /// The declaration, if some record declares this type
    pub fn declaration(&self) -> Option<Declaration<'a>> {
        self.declaration
    }

    /// Whether some collected record declares this type
    pub fn is_defined(&self) -> bool {
        self.declaration.is_some()
    }
}

/// A file: either a collected record or a dependency nobody supplied.
#[derive(Debug, Clone)]
pub struct FileNode<'a> {
    name: &'a str,
    record: Option<usize>,
    dependencies: Vec<FileId>,
    all_public_dependencies: BTreeSet<usize>,
    types: Vec<TypeId>,
}

impl FileNode<'_> {
    /// File name as used in imports
    pub fn name(&self) -> &str {
        self.name
    }

    /// Index of the record, `None` for a missing dependency
    pub fn record(&self) -> Option<usize> {
        self.record
    }

    /// Whether a collected record backs this node
    pub fn is_defined(&self) -> bool {
        self.record.is_some()
    }

    /// Resolved direct dependencies, `google` ones excluded
    pub fn dependencies(&self) -> &[FileId] {
        &self.dependencies
    }

    /// Record indices visible through imports (never this file itself)
    pub fn all_public_dependencies(&self) -> &BTreeSet<usize> {
        &self.all_public_dependencies
    }

    /// Every type this file declares or references
    pub fn types(&self) -> &[TypeId] {
        &self.types
    }
}

/// One reason the collected records do not link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkIssue {
    /// An imported file was never collected
    MissingDependency {
        /// The imported file name
        name: String,
        /// Files importing it
        required_by: Vec<String>,
    },
    /// A referenced type is declared by no collected file
    MissingType {
        /// Fully-qualified type name
        name: String,
        /// Files referring to it
        referenced_by: Vec<String>,
    },
    /// Two records declare the same fully-qualified name
    DuplicateType {
        /// Fully-qualified type name
        name: String,
        /// File holding the first declaration
        first: String,
        /// File holding the rejected declaration
        second: String,
    },
}

impl LinkIssue {
    /// The unresolved or conflicting name
    pub fn name(&self) -> &str {
        match self {
            Self::MissingDependency { name, .. }
            | Self::MissingType { name, .. }
            | Self::DuplicateType { name, .. } => name,
        }
    }
}

impl fmt::Display for LinkIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDependency { name, required_by } => {
                write!(f, "dependency not found: {} (imported by {})", name, required_by.join(", "))
            }
            Self::MissingType {
                name,
                referenced_by,
            } => write!(f, "type not found: {} (used by {})", name, referenced_by.join(", ")),
            Self::DuplicateType {
                name,
                first,
                second,
            } => write!(f, "type {} declared by both {} and {}", name, first, second),
        }
    }
}

/// Every issue found by a failed [`analyze`].
#[derive(Debug, Clone, Error)]
#[error("{} unresolved schema reference(s):\n{}", .issues.len(), describe(.issues))]
pub struct LinkErrors {
    issues: Vec<LinkIssue>,
}

impl LinkErrors {
    /// The individual issues, dependencies first
    pub fn issues(&self) -> &[LinkIssue] {
        &self.issues
    }

    /// Consumes the error, returning its issues
    pub fn into_issues(self) -> Vec<LinkIssue> {
        self.issues
    }
}

fn describe(issues: &[LinkIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("  {}", issue))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Linked view over a set of records.
#[derive(Debug)]
pub struct SymbolGraph<'a> {
    records: &'a [FileDescriptor],
    files: Vec<FileNode<'a>>,
    file_index: HashMap<&'a str, FileId>,
    types: Vec<TypeNode<'a>>,
    type_index: HashMap<String, TypeId>,
}

/// Link `records` into a closed symbol graph.
///
/// Fails with every unresolved dependency and type name at once.
pub fn analyze(records: &[FileDescriptor]) -> Result<SymbolGraph<'_>, LinkErrors> {
    SymbolGraph::analyze(records)
}

impl<'a> SymbolGraph<'a> {
    /// See [`analyze`].
    pub fn analyze(records: &'a [FileDescriptor]) -> Result<Self, LinkErrors> {
        let mut graph = SymbolGraph {
            records,
            files: Vec::with_capacity(records.len()),
            file_index: HashMap::with_capacity(records.len()),
            types: Vec::new(),
            type_index: HashMap::new(),
        };
        let mut issues = Vec::new();

        for (index, record) in records.iter().enumerate() {
            graph.add_record(index, record, &mut issues);
        }

        graph.resolve_dependencies();

        let mut unresolved = graph.unresolved();
        unresolved.append(&mut issues);
        if !unresolved.is_empty() {
            for issue in &unresolved {
                warn!("{}", issue);
            }
            return Err(LinkErrors { issues: unresolved });
        }

        for id in 0..graph.files.len() {
            let closure = graph.public_closure(id);
            graph.files[id].all_public_dependencies = closure;
        }

        debug!(
            "linked {} files, {} types",
            graph.files.len(),
            graph.types.len()
        );
        Ok(graph)
    }

    /// The records this graph was built from, in collection order
    pub fn records(&self) -> &'a [FileDescriptor] {
        self.records
    }

    /// All file nodes; the first `records().len()` belong to records
    pub fn files(&self) -> &[FileNode<'a>] {
        &self.files
    }

    /// File node by import name
    pub fn file(&self, name: &str) -> Option<&FileNode<'a>> {
        self.file_index.get(name).map(|&id| &self.files[id])
    }

    /// All type nodes, in first-seen order
    pub fn types(&self) -> &[TypeNode<'a>] {
        &self.types
    }

    /// Type node by fully-qualified name
    pub fn type_node(&self, name: &str) -> Option<&TypeNode<'a>> {
        self.type_index.get(name).map(|&id| &self.types[id])
    }

    /// Declaration of a fully-qualified type name
    pub fn declaration(&self, name: &str) -> Option<Declaration<'a>> {
        self.type_node(name).and_then(TypeNode::declaration)
    }

    /// Public closure of the record at `record`
    pub fn public_dependencies(&self, record: usize) -> &BTreeSet<usize> {
        &self.files[record].all_public_dependencies
    }

    fn add_record(&mut self, index: usize, record: &'a FileDescriptor, issues: &mut Vec<LinkIssue>) {
        let id = self.files.len();
        self.files.push(FileNode {
            name: record.name(),
            record: Some(index),
            dependencies: Vec::new(),
            all_public_dependencies: BTreeSet::new(),
            types: Vec::new(),
        });
        if self.file_index.insert(record.name(), id).is_some() {
            warn!("file '{}' collected twice; the later record shadows the earlier", record.name());
        }

        let package = qualify_package(record.package());
        let mut scope = Scope {
            graph: self,
            file: id,
            issues,
        };

        for extension in &record.extension {
            scope.declare(join(&package, extension.name()), Declaration::Field(extension));
            scope.reference_field(&package, extension);
        }

        for enum_type in &record.enum_type {
            scope.declare(join(&package, enum_type.name()), Declaration::Enum(enum_type));
        }

        for message in &record.message_type {
            scope.message(message, &package);
        }

        for service in &record.service {
            scope.declare(join(&package, service.name()), Declaration::Service(service));
            for method in &service.method {
                scope.reference(&package, method.input_type());
                scope.reference(&package, method.output_type());
            }
        }
    }

    fn resolve_dependencies(&mut self) {
        let records = self.records;
        for (id, record) in records.iter().enumerate() {
            for dependency in &record.dependency {
                let dependency = dependency.as_str();
                if dependency.starts_with(RESERVED_DEPENDENCY_PREFIX) {
                    continue;
                }

                let target = match self.file_index.get(dependency) {
                    Some(&target) => target,
                    None => {
                        let target = self.files.len();
                        self.files.push(FileNode {
                            name: dependency,
                            record: None,
                            dependencies: Vec::new(),
                            all_public_dependencies: BTreeSet::new(),
                            types: Vec::new(),
                        });
                        self.file_index.insert(dependency, target);
                        target
                    }
                };
                self.files[id].dependencies.push(target);
            }
        }
    }

    fn unresolved(&self) -> Vec<LinkIssue> {
        let mut issues = Vec::new();

        for (id, node) in self.files.iter().enumerate() {
            if node.is_defined() {
                continue;
            }
            let required_by = self
                .files
                .iter()
                .filter(|f| f.dependencies.contains(&id))
                .map(|f| f.name.to_string())
                .collect();
            issues.push(LinkIssue::MissingDependency {
                name: node.name.to_string(),
                required_by,
            });
        }

        for (id, node) in self.types.iter().enumerate() {
            if node.is_defined() {
                continue;
            }
            let referenced_by = self
                .files
                .iter()
                .filter(|f| f.types.contains(&id))
                .map(|f| f.name.to_string())
                .collect();
            issues.push(LinkIssue::MissingType {
                name: node.name.clone(),
                referenced_by,
            });
        }

        issues
    }

    /// Direct imports, then the public imports of anything already included.
    fn public_closure(&self, root: FileId) -> BTreeSet<usize> {
        let mut closure = BTreeSet::new();
        let Some(record) = self.files[root].record else {
            return closure;
        };

        let mut visited = HashSet::from([root]);
        let mut queue = VecDeque::new();

        for dependency in &self.records[record].dependency {
            if let Some(id) = self.collected(dependency) {
                if visited.insert(id) {
                    queue.push_back(id);
                }
            }
        }

        while let Some(id) = queue.pop_front() {
            let Some(record) = self.files[id].record else {
                continue;
            };
            closure.insert(record);

            for dependency in self.records[record].public_dependency_names() {
                if let Some(next) = self.collected(dependency) {
                    if visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }

        closure
    }

    fn collected(&self, name: &str) -> Option<FileId> {
        self.file_index
            .get(name)
            .copied()
            .filter(|&id| self.files[id].is_defined())
    }

    fn intern(&mut self, name: String) -> TypeId {
        if let Some(&id) = self.type_index.get(&name) {
            return id;
        }
        let id = self.types.len();
        self.type_index.insert(name.clone(), id);
        self.types.push(TypeNode {
            name,
            owner: None,
            declaration: None,
        });
        id
    }
}

/// Registration context for one record.
struct Scope<'g, 'a> {
    graph: &'g mut SymbolGraph<'a>,
    file: FileId,
    issues: &'g mut Vec<LinkIssue>,
}

impl<'a> Scope<'_, 'a> {
    /// Complete (or create) the node for a declared type.
    fn declare(&mut self, name: String, declaration: Declaration<'a>) {
        let id = self.graph.intern(name);
        let owner = self.graph.files[self.file].record;
        let node = &mut self.graph.types[id];

        if node.is_defined() {
            let first = node
                .owner
                .map(|r| self.graph.records[r].name().to_string())
                .unwrap_or_default();
            self.issues.push(LinkIssue::DuplicateType {
                name: node.name.clone(),
                first,
                second: self.graph.files[self.file].name.to_string(),
            });
        } else {
            node.owner = owner;
            node.declaration = Some(declaration);
        }

        self.graph.files[self.file].types.push(id);
    }

    /// Record a use of `name`; empty names are ignored.
    fn reference(&mut self, scope: &str, name: &str) {
        if name.is_empty() {
            return;
        }
        let id = self.graph.intern(resolve(scope, name));
        self.graph.files[self.file].types.push(id);
    }

    fn reference_field(&mut self, scope: &str, field: &FieldDescriptor) {
        if let Some(type_name) = field.referenced_type() {
            self.reference(scope, type_name);
        }
        if let Some(extendee) = field.extendee_name() {
            self.reference(scope, extendee);
        }
    }

    fn message(&mut self, message: &'a MessageDescriptor, scope: &str) {
        let path = join(scope, message.name());
        self.declare(path.clone(), Declaration::Message(message));

        for extension in &message.extension {
            self.declare(join(&path, extension.name()), Declaration::Field(extension));
            self.reference_field(scope, extension);
        }

        for enum_type in &message.enum_type {
            self.declare(join(&path, enum_type.name()), Declaration::Enum(enum_type));
        }

        for field in &message.field {
            self.reference_field(scope, field);
        }

        for nested in &message.nested_type {
            self.message(nested, &path);
        }
    }
}

/// `.package` for a non-empty package, empty otherwise.
fn qualify_package(package: &str) -> String {
    if package.is_empty() || package.starts_with('.') {
        package.to_string()
    } else {
        format!(".{}", package)
    }
}

fn join(scope: &str, name: &str) -> String {
    format!("{}.{}", scope, name)
}

/// Fully-qualified names pass through; relative ones are joined to `scope`.
fn resolve(scope: &str, name: &str) -> String {
    if name.starts_with('.') {
        name.to_string()
    } else {
        join(scope, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EnumValueDescriptor, MethodDescriptor, Type};

    fn file(name: &str, package: &str, deps: &[&str], public: &[i32]) -> FileDescriptor {
        FileDescriptor {
            name: Some(name.into()),
            package: Some(package.into()),
            dependency: deps.iter().map(|d| d.to_string()).collect(),
            public_dependency: public.to_vec(),
            ..Default::default()
        }
    }

    fn message(name: &str) -> MessageDescriptor {
        MessageDescriptor {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    fn message_field(name: &str, number: i32, type_name: &str) -> FieldDescriptor {
        FieldDescriptor {
            name: Some(name.into()),
            number: Some(number),
            r#type: Some(Type::Message as i32),
            type_name: Some(type_name.into()),
            ..Default::default()
        }
    }

    fn closure_names(graph: &SymbolGraph<'_>, name: &str) -> Vec<String> {
        let id = graph.file_index[name];
        graph.files()[id]
            .all_public_dependencies()
            .iter()
            .map(|&r| graph.records()[r].name().to_string())
            .collect()
    }

    #[test]
    fn test_declares_nested_types() {
        let mut outer = message("Outer");
        outer.nested_type.push(message("Inner"));
        outer.enum_type.push(EnumDescriptor {
            name: Some("Kind".into()),
            value: vec![EnumValueDescriptor {
                name: Some("A".into()),
                number: Some(0),
                ..Default::default()
            }],
            ..Default::default()
        });
        outer.field.push(message_field("inner", 1, ".pkg.Outer.Inner"));

        let mut record = file("a.proto", "pkg", &[], &[]);
        record.message_type.push(outer);
        let records = vec![record];

        let graph = analyze(&records).unwrap();
        assert!(matches!(
            graph.declaration(".pkg.Outer"),
            Some(Declaration::Message(_))
        ));
        assert!(matches!(
            graph.declaration(".pkg.Outer.Inner"),
            Some(Declaration::Message(_))
        ));
        assert!(matches!(
            graph.declaration(".pkg.Outer.Kind"),
            Some(Declaration::Enum(_))
        ));
        assert_eq!(graph.type_node(".pkg.Outer.Inner").unwrap().owner(), Some(0));
    }

    #[test]
    fn test_forward_reference_completed_by_later_file() {
        let mut user = file("user.proto", "app", &["types.proto"], &[]);
        let mut holder = message("Holder");
        holder.field.push(message_field("t", 1, ".lib.Thing"));
        user.message_type.push(holder);

        let mut types = file("types.proto", "lib", &[], &[]);
        types.message_type.push(message("Thing"));

        let records = vec![user, types];
        let graph = analyze(&records).unwrap();
        let node = graph.type_node(".lib.Thing").unwrap();
        assert!(node.is_defined());
        assert_eq!(node.owner(), Some(1));
        assert_eq!(graph.file("user.proto").unwrap().dependencies(), &[1]);
    }

    #[test]
    fn test_missing_dependency_reported() {
        let records = vec![
            file("x.proto", "", &["y.proto"], &[]),
            file("z.proto", "", &["y.proto", "google/protobuf/any.proto"], &[]),
        ];

        let err = analyze(&records).unwrap_err();
        assert_eq!(
            err.issues(),
            &[LinkIssue::MissingDependency {
                name: "y.proto".into(),
                required_by: vec!["x.proto".into(), "z.proto".into()],
            }]
        );
        assert!(err.to_string().contains("y.proto"));
    }

    #[test]
    fn test_missing_type_reported() {
        let mut record = file("a.proto", "pkg", &[], &[]);
        let mut msg = message("M");
        msg.field.push(message_field("ghost", 1, ".pkg.Ghost"));
        msg.field.push(message_field("other", 2, ".other.Missing"));
        record.message_type.push(msg);
        let records = vec![record];

        let err = analyze(&records).unwrap_err();
        let names: Vec<_> = err.issues().iter().map(LinkIssue::name).collect();
        assert_eq!(names, vec![".pkg.Ghost", ".other.Missing"]);
    }

    #[test]
    fn test_all_issues_reported_together() {
        let mut record = file("a.proto", "", &["missing.proto"], &[]);
        record.service.push(ServiceDescriptor {
            name: Some("Svc".into()),
            method: vec![MethodDescriptor {
                name: Some("Call".into()),
                input_type: Some(".Req".into()),
                output_type: Some(".Resp".into()),
                ..Default::default()
            }],
            ..Default::default()
        });
        let records = vec![record];

        let err = analyze(&records).unwrap_err();
        assert_eq!(err.issues().len(), 3);
        assert!(matches!(err.issues()[0], LinkIssue::MissingDependency { .. }));
    }

    #[test]
    fn test_duplicate_declaration_reported() {
        let mut first = file("a.proto", "pkg", &[], &[]);
        first.message_type.push(message("Same"));
        let mut second = file("b.proto", "pkg", &[], &[]);
        second.message_type.push(message("Same"));
        let records = vec![first, second];

        let err = analyze(&records).unwrap_err();
        assert_eq!(
            err.issues(),
            &[LinkIssue::DuplicateType {
                name: ".pkg.Same".into(),
                first: "a.proto".into(),
                second: "b.proto".into(),
            }]
        );
    }

    #[test]
    fn test_public_closure_follows_public_chain_only() {
        let records = vec![
            file("a.proto", "", &["b.proto"], &[0]),
            file("b.proto", "", &["c.proto"], &[0]),
            file("c.proto", "", &[], &[]),
            file("d.proto", "", &["a.proto"], &[]),
            file("e.proto", "", &["d.proto"], &[]),
        ];

        let graph = analyze(&records).unwrap();
        assert_eq!(closure_names(&graph, "d.proto"), vec!["a.proto", "b.proto", "c.proto"]);
        assert_eq!(closure_names(&graph, "e.proto"), vec!["d.proto"]);
        assert_eq!(closure_names(&graph, "a.proto"), vec!["b.proto", "c.proto"]);
        assert!(closure_names(&graph, "c.proto").is_empty());
    }

    #[test]
    fn test_non_public_import_not_reexported() {
        let records = vec![
            file("a.proto", "", &["b.proto"], &[]),
            file("b.proto", "", &[], &[]),
            file("top.proto", "", &["a.proto"], &[]),
        ];
        let graph = analyze(&records).unwrap();
        assert_eq!(closure_names(&graph, "top.proto"), vec!["a.proto"]);
    }

    #[test]
    fn test_public_closure_terminates_on_cycles() {
        let records = vec![
            file("a.proto", "", &["b.proto"], &[0]),
            file("b.proto", "", &["a.proto"], &[0]),
        ];
        let graph = analyze(&records).unwrap();
        assert_eq!(closure_names(&graph, "a.proto"), vec!["b.proto"]);
        assert_eq!(closure_names(&graph, "b.proto"), vec!["a.proto"]);
    }

    #[test]
    fn test_collected_google_file_joins_closure() {
        let records = vec![
            file("google/protobuf/descriptor.proto", "google.protobuf", &[], &[]),
            file("opts.proto", "", &["google/protobuf/descriptor.proto"], &[]),
        ];
        let graph = analyze(&records).unwrap();
        assert!(graph.file("opts.proto").unwrap().dependencies().is_empty());
        assert_eq!(
            closure_names(&graph, "opts.proto"),
            vec!["google/protobuf/descriptor.proto"]
        );
    }

    #[test]
    fn test_resolve_names() {
        assert_eq!(qualify_package("a.b"), ".a.b");
        assert_eq!(qualify_package(""), "");
        assert_eq!(join("", "Top"), ".Top");
        assert_eq!(resolve(".pkg", ".abs.Name"), ".abs.Name");
        assert_eq!(resolve(".pkg", "Rel"), ".pkg.Rel");
    }
}
