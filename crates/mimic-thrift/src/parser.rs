//! Thrift IDL parsing: include resolution, identifier binding, and folding
//! into the normalized type graph.
//!
//! Identifier binding is first-wins in pre-order traversal: a name defined by
//! the including file shadows any later definition from an included file, and
//! the first included definition shadows subsequent ones. The identifier
//! table lives in a per-parse session, never in process state, so parses are
//! independent.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde_json::Value;
use tracing::debug;

use crate::ast::{
    ConstValue, EnumNode, FieldNode, FunctionNode, ServiceNode, Statement, StructKind, StructNode,
    TypeExpr, TypedefNode,
};
use crate::file::{
    ConstantDef, EnumDef, EnumMember, ExtraType, Field, FieldType, FunctionDef, Requiredness,
    ServiceDef, StructDef, ThriftJson, TypeId, TypeNode, TypedefDef,
};
use crate::grammar::{locate, parse_document};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("couldn't find/read file \"{file}\"")]
    FilesRead {
        file: String,
        /// Every path that was tried, in search order.
        tried: Vec<String>,
    },
    #[error("{message} in {file} at {line}:{column}")]
    Thrift {
        message: String,
        file: String,
        line: u32,
        column: u32,
    },
}

impl ParseError {
    fn thrift(message: impl Into<String>, file: &str) -> Self {
        ParseError::Thrift {
            message: message.into(),
            file: file.to_string(),
            line: 0,
            column: 0,
        }
    }
}

/// Parses a root file and its includes into one [`ThriftJson`].
pub struct ThriftParser {
    includes: Vec<String>,
}

impl ThriftParser {
    pub fn new(includes: Vec<String>) -> Self {
        Self { includes }
    }

    pub async fn parse(&self, file_path: &str) -> Result<ThriftJson, ParseError> {
        let mut session = ParseSession::new(&self.includes);
        let name = Path::new(file_path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.to_string());
        // The root file resolves against the working directory only;
        // includes additionally search the including file's directory and
        // the configured roots.
        let ast = session
            .parse_files(file_path.to_string(), vec![String::new()])
            .await?;
        session.fold(&name, &ast)
    }
}

/// One parsed file with its doc-annotated statements.
struct AstFile {
    file: String,
    statements: Vec<(Option<String>, Statement)>,
}

/// Identifier table entry.
#[derive(Debug, Clone)]
enum Ident {
    Struct,
    Union,
    Exception,
    Enum,
    Typedef(TypeExpr),
}

struct ParseSession {
    includes: Vec<String>,
    identifiers: HashMap<String, Ident>,
    visited: HashSet<PathBuf>,
}

impl ParseSession {
    fn new(includes: &[String]) -> Self {
        Self {
            includes: includes.to_vec(),
            identifiers: HashMap::new(),
            visited: HashSet::new(),
        }
    }

    /// Read, parse and recurse through includes. Included files precede the
    /// including file in the returned list. Boxed because include resolution
    /// recurses.
    fn parse_files<'a>(
        &'a mut self,
        file_path: String,
        roots: Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AstFile>, ParseError>> + Send + 'a>> {
        Box::pin(async move {
            let (file, source) = self.read_any(&file_path, &roots).await?;

            let canonical = tokio::fs::canonicalize(&file)
                .await
                .unwrap_or_else(|_| PathBuf::from(&file));
            if !self.visited.insert(canonical) {
                // Already parsed through another include path.
                return Ok(Vec::new());
            }

            let statements = parse_document(&source).map_err(|err| {
                let (line, column) = locate(&source, err.offset);
                ParseError::Thrift {
                    message: err.message,
                    file: file.clone(),
                    line,
                    column,
                }
            })?;

            // Bind identifiers before descending so the including file wins.
            let mut nested_paths = Vec::new();
            for (_, statement) in &statements {
                match statement {
                    Statement::Include { path } => nested_paths.push(path.clone()),
                    Statement::Typedef(TypedefNode { name, ty, .. }) => {
                        self.bind(name, Ident::Typedef(ty.clone()));
                    }
                    Statement::Enum(EnumNode { name, .. }) => self.bind(name, Ident::Enum),
                    Statement::Struct(StructNode { kind, name, .. }) => {
                        let ident = match kind {
                            StructKind::Struct => Ident::Struct,
                            StructKind::Union => Ident::Union,
                            StructKind::Exception => Ident::Exception,
                        };
                        self.bind(name, ident);
                    }
                    Statement::Const(_) | Statement::Service(_) => {}
                }
            }

            let mut result = Vec::new();
            let current_dir = Path::new(&file)
                .parent()
                .map(|dir| dir.to_string_lossy().into_owned())
                .unwrap_or_default();
            for nested in nested_paths {
                // Relative includes resolve relative to the includer first.
                let mut nested_roots = vec![current_dir.clone()];
                nested_roots.extend(self.includes.clone());
                let nested_files = self.parse_files(nested, nested_roots).await?;
                result.extend(nested_files);
            }
            result.push(AstFile { file, statements });
            Ok(result)
        })
    }

    async fn read_any(
        &self,
        file_path: &str,
        roots: &[String],
    ) -> Result<(String, String), ParseError> {
        let tried: Vec<String> = roots
            .iter()
            .map(|root| {
                Path::new(root)
                    .join(file_path)
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        for candidate in &tried {
            match tokio::fs::read_to_string(candidate).await {
                Ok(source) => return Ok((candidate.clone(), source)),
                Err(err) => debug!("skipping {candidate}: {err}"),
            }
        }
        Err(ParseError::FilesRead {
            file: file_path.to_string(),
            tried,
        })
    }

    fn bind(&mut self, name: &str, ident: Ident) {
        // First definition wins across the whole include tree.
        self.identifiers.entry(name.to_string()).or_insert(ident);
    }

    /// Fold all parsed files into one deduplicated, deterministically
    /// ordered type graph.
    fn fold(&self, name: &str, ast: &[AstFile]) -> Result<ThriftJson, ParseError> {
        let mut enums: HashMap<String, EnumDef> = HashMap::new();
        let mut typedefs: HashMap<String, TypedefDef> = HashMap::new();
        let mut structs: HashMap<String, StructDef> = HashMap::new();
        let mut constants: HashMap<String, ConstantDef> = HashMap::new();
        let mut services: Vec<ServiceDef> = Vec::new();

        for AstFile { file, statements } in ast {
            for (doc, statement) in statements {
                match statement {
                    Statement::Include { .. } => {}
                    Statement::Enum(node) => {
                        enums
                            .entry(node.name.clone())
                            .or_insert_with(|| convert_enum(node, doc.clone()));
                    }
                    Statement::Typedef(node) => {
                        if !typedefs.contains_key(&node.name) {
                            let def = TypedefDef {
                                name: node.name.clone(),
                                doc: doc.clone(),
                                ty: self.ast_to_type(&node.ty, file)?,
                            };
                            typedefs.insert(node.name.clone(), def);
                        }
                    }
                    Statement::Struct(node) => {
                        if !structs.contains_key(&node.name) {
                            let def = self.convert_struct(node, doc.clone(), file)?;
                            structs.insert(node.name.clone(), def);
                        }
                    }
                    Statement::Const(node) => {
                        if !constants.contains_key(&node.name) {
                            let def = ConstantDef {
                                name: node.name.clone(),
                                doc: doc.clone(),
                                ty: self.ast_to_type(&node.ty, file)?,
                                value: const_to_json(&node.value),
                            };
                            constants.insert(node.name.clone(), def);
                        }
                    }
                    Statement::Service(node) => {
                        if !services.iter().any(|s| s.name == node.name) {
                            services.push(self.convert_service(node, doc.clone(), file)?);
                        }
                    }
                }
            }
        }

        Ok(ThriftJson {
            name: name.to_string(),
            doc: None,
            enums: sorted_by_name(enums, |e| &e.name),
            typedefs: sorted_by_name(typedefs, |t| &t.name),
            structs: sorted_by_name(structs, |s| &s.name),
            constants: sorted_by_name(constants, |c| &c.name),
            // Encounter order; the codec orders by `extends` separately.
            services,
        })
    }

    fn convert_struct(
        &self,
        node: &StructNode,
        doc: Option<String>,
        file: &str,
    ) -> Result<StructDef, ParseError> {
        Ok(StructDef {
            name: node.name.clone(),
            doc,
            is_exception: node.kind == StructKind::Exception,
            is_union: node.kind == StructKind::Union,
            fields: self.convert_fields(&node.fields, file)?,
        })
    }

    fn convert_service(
        &self,
        node: &ServiceNode,
        doc: Option<String>,
        file: &str,
    ) -> Result<ServiceDef, ParseError> {
        let mut functions = node
            .functions
            .iter()
            .map(|f| self.convert_function(f, file))
            .collect::<Result<Vec<_>, _>>()?;
        // Deterministic downstream output.
        functions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ServiceDef {
            name: node.name.clone(),
            extends: node.extends.as_deref().map(plain_name).map(String::from),
            doc,
            functions,
        })
    }

    fn convert_function(&self, node: &FunctionNode, file: &str) -> Result<FunctionDef, ParseError> {
        let ret = self.ast_to_type(&node.ret, file)?;
        Ok(FunctionDef {
            name: node.name.clone(),
            return_type_id: ret.type_id,
            return_type: ret.node,
            return_extra: ret.extra,
            oneway: node.oneway,
            doc: None,
            arguments: self.convert_fields(&node.args, file)?,
            exceptions: self.convert_fields(&node.throws, file)?,
        })
    }

    fn convert_fields(&self, nodes: &[FieldNode], file: &str) -> Result<Vec<Field>, ParseError> {
        nodes.iter().map(|f| self.convert_field(f, file)).collect()
    }

    fn convert_field(&self, node: &FieldNode, file: &str) -> Result<Field, ParseError> {
        let key = match node.id {
            Some(id) if id >= 1 && id <= i16::MAX as i64 => id as i16,
            _ => return Err(ParseError::thrift("Invalid field id", file)),
        };
        Ok(Field {
            key,
            name: node.name.clone(),
            ty: self.ast_to_type(&node.ty, file)?,
            required: node.requiredness.unwrap_or(Requiredness::ReqOut),
            default: node.default.as_ref().map(const_to_json),
        })
    }

    fn ast_to_type(&self, expr: &TypeExpr, file: &str) -> Result<FieldType, ParseError> {
        use crate::ast::BaseType;
        match expr {
            TypeExpr::Base(base) => Ok(FieldType::scalar(match base {
                BaseType::Bool => TypeId::Bool,
                BaseType::Byte => TypeId::Byte,
                BaseType::I8 => TypeId::I8,
                BaseType::I16 => TypeId::I16,
                BaseType::I32 => TypeId::I32,
                BaseType::I64 => TypeId::I64,
                BaseType::Double => TypeId::Double,
                BaseType::String => TypeId::String,
                BaseType::Binary => TypeId::Binary,
                BaseType::Void => TypeId::Void,
            })),
            TypeExpr::List(elem) | TypeExpr::Set(elem) => {
                let resolved = self.ast_to_type(elem, file)?;
                let type_id = if matches!(expr, TypeExpr::List(_)) {
                    TypeId::List
                } else {
                    TypeId::Set
                };
                let node = if type_id == TypeId::List {
                    TypeNode::List {
                        elem_type_id: resolved.type_id,
                        elem_type: resolved.node.map(Box::new),
                        extra: resolved.extra,
                    }
                } else {
                    TypeNode::Set {
                        elem_type_id: resolved.type_id,
                        elem_type: resolved.node.map(Box::new),
                        extra: resolved.extra,
                    }
                };
                Ok(FieldType {
                    type_id,
                    node: Some(node),
                    extra: None,
                })
            }
            TypeExpr::Map(key, value) => {
                let key = self.ast_to_type(key, file)?;
                let value = self.ast_to_type(value, file)?;
                Ok(FieldType {
                    type_id: TypeId::Map,
                    node: Some(TypeNode::Map {
                        key_type_id: key.type_id,
                        value_type_id: value.type_id,
                        key_type: key.node.map(Box::new),
                        value_type: value.node.map(Box::new),
                        key_extra: key.extra,
                        value_extra: value.extra,
                    }),
                    extra: None,
                })
            }
            TypeExpr::Named(name) => self.ident_to_type(name, file),
        }
    }

    fn ident_to_type(&self, raw: &str, file: &str) -> Result<FieldType, ParseError> {
        let name = plain_name(raw);
        let ident = self.identifiers.get(name).ok_or_else(|| {
            ParseError::thrift(format!("Can't find \"{raw}\" identifier"), file)
        })?;
        let class = name.to_string();
        Ok(match ident {
            Ident::Struct => FieldType {
                type_id: TypeId::Struct,
                node: Some(TypeNode::Struct { class }),
                extra: None,
            },
            Ident::Union => FieldType {
                type_id: TypeId::Union,
                node: Some(TypeNode::Union { class }),
                extra: None,
            },
            Ident::Exception => FieldType {
                type_id: TypeId::Exception,
                node: Some(TypeNode::Exception { class }),
                extra: None,
            },
            // Enums are wire-encoded as i32.
            Ident::Enum => FieldType {
                type_id: TypeId::I32,
                node: None,
                extra: Some(ExtraType::Enum { class }),
            },
            // Typedefs resolve to the aliased type, keeping the alias name.
            Ident::Typedef(aliased) => {
                let aliased = aliased.clone();
                let mut resolved = self.ast_to_type(&aliased, file)?;
                resolved.extra = Some(ExtraType::Typedef { class });
                resolved
            }
        })
    }
}

fn convert_enum(node: &EnumNode, doc: Option<String>) -> EnumDef {
    let mut value = -1;
    let members = node
        .members
        .iter()
        .map(|(name, explicit)| {
            value = explicit.unwrap_or(value + 1);
            EnumMember {
                name: name.clone(),
                value,
            }
        })
        .collect();
    EnumDef {
        name: node.name.clone(),
        doc,
        members,
    }
}

fn const_to_json(value: &ConstValue) -> Value {
    match value {
        ConstValue::Bool(b) => Value::Bool(*b),
        ConstValue::Int(i) => Value::from(*i),
        ConstValue::Double(d) => Value::from(*d),
        ConstValue::Str(s) | ConstValue::Ident(s) => Value::String(s.clone()),
        ConstValue::List(items) => Value::Array(items.iter().map(const_to_json).collect()),
        ConstValue::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (const_key(key), const_to_json(value)))
                .collect(),
        ),
    }
}

fn const_key(value: &ConstValue) -> String {
    match const_to_json(value) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Strip a `module.` prefix from cross-file references.
fn plain_name(raw: &str) -> &str {
    raw.rsplit('.').next().unwrap_or(raw)
}

fn sorted_by_name<T>(map: HashMap<String, T>, name: impl Fn(&T) -> &String) -> Vec<T> {
    let mut items: Vec<T> = map.into_values().collect();
    items.sort_by(|a, b| name(a).cmp(name(b)));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    async fn parse_source(source: &str) -> Result<ThriftJson, ParseError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.thrift");
        fs::write(&path, source).unwrap();
        ThriftParser::new(vec![])
            .parse(path.to_str().unwrap())
            .await
    }

    #[tokio::test]
    async fn test_missing_file_lists_tried_paths() {
        let err = ThriftParser::new(vec![])
            .parse("nope/missing.thrift")
            .await
            .unwrap_err();
        match err {
            ParseError::FilesRead { file, tried } => {
                assert_eq!(file, "nope/missing.thrift");
                assert_eq!(tried, vec!["nope/missing.thrift".to_string()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_types_sorted_functions_sorted_services_in_order() {
        let parsed = parse_source(
            r#"
            struct Zeta { 1: i32 z }
            struct Alpha { 1: i32 a }
            service Second { void b() void a() }
            service First { void z() }
        "#,
        )
        .await
        .unwrap();
        let struct_names: Vec<&str> = parsed.structs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(struct_names, vec!["Alpha", "Zeta"]);
        let service_names: Vec<&str> = parsed.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(service_names, vec!["Second", "First"]);
        let function_names: Vec<&str> = parsed.services[0]
            .functions
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(function_names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_deterministic_roundtrip() {
        let source = r#"
            enum Status { OK = 200 ERROR = 500 }
            struct User { 1: string name 2: optional Status status }
            service Users { User fetch(1: string name) }
        "#;
        let first = serde_json::to_string(&parse_source(source).await.unwrap()).unwrap();
        let second = serde_json::to_string(&parse_source(source).await.unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_field_requiredness_defaults_to_req_out() {
        let parsed = parse_source("struct S { 1: i32 plain 2: optional i32 opt }")
            .await
            .unwrap();
        let fields = &parsed.structs[0].fields;
        assert_eq!(fields[0].required, Requiredness::ReqOut);
        assert_eq!(fields[1].required, Requiredness::Optional);
    }

    #[tokio::test]
    async fn test_invalid_field_id_is_rejected() {
        for source in ["struct S { 0: i32 bad }", "struct S { i32 bad }"] {
            let err = parse_source(source).await.unwrap_err();
            match err {
                ParseError::Thrift { message, .. } => assert_eq!(message, "Invalid field id"),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_enum_reference_resolves_to_i32() {
        let parsed = parse_source(
            r#"
            enum Status { OK }
            struct S { 1: Status status }
        "#,
        )
        .await
        .unwrap();
        let field = &parsed.structs[0].fields[0];
        assert_eq!(field.ty.type_id, TypeId::I32);
        assert_eq!(
            field.ty.extra,
            Some(ExtraType::Enum {
                class: "Status".into()
            })
        );
    }

    #[tokio::test]
    async fn test_typedef_keeps_underlying_type() {
        let parsed = parse_source(
            r#"
            typedef map<string, i64> Counters
            struct S { 1: Counters counters }
        "#,
        )
        .await
        .unwrap();
        let field = &parsed.structs[0].fields[0];
        assert_eq!(field.ty.type_id, TypeId::Map);
        assert_eq!(
            field.ty.extra,
            Some(ExtraType::Typedef {
                class: "Counters".into()
            })
        );
        assert!(matches!(field.ty.node, Some(TypeNode::Map { .. })));
    }

    #[tokio::test]
    async fn test_unresolved_identifier_fails() {
        let err = parse_source("struct S { 1: Missing m }").await.unwrap_err();
        match err {
            ParseError::Thrift { message, .. } => {
                assert_eq!(message, "Can't find \"Missing\" identifier")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_includes_resolve_relative_to_includer() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(
            nested.join("shared.thrift"),
            "struct Shared { 1: i32 id }",
        )
        .unwrap();
        fs::write(
            nested.join("main.thrift"),
            r#"
            include "shared.thrift"
            struct Main { 1: Shared shared }
        "#,
        )
        .unwrap();
        let parsed = ThriftParser::new(vec![])
            .parse(nested.join("main.thrift").to_str().unwrap())
            .await
            .unwrap();
        let names: Vec<&str> = parsed.structs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Main", "Shared"]);
    }

    #[tokio::test]
    async fn test_identifier_first_wins_across_includes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("one.thrift"),
            "struct Foo { 1: i32 first }",
        )
        .unwrap();
        fs::write(
            dir.path().join("two.thrift"),
            "struct Foo { 1: string second }",
        )
        .unwrap();
        fs::write(
            dir.path().join("main.thrift"),
            r#"
            include "one.thrift"
            include "two.thrift"
            struct Bar { 1: Foo foo }
        "#,
        )
        .unwrap();
        let parsed = ThriftParser::new(vec![])
            .parse(dir.path().join("main.thrift").to_str().unwrap())
            .await
            .unwrap();
        // The first definition encountered is retained.
        let foo = parsed.find_struct("Foo").unwrap();
        assert_eq!(foo.fields[0].name, "first");
    }

    #[tokio::test]
    async fn test_cross_module_reference() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("shared.thrift"),
            "struct SharedStruct { 1: i32 key }",
        )
        .unwrap();
        fs::write(
            dir.path().join("main.thrift"),
            r#"
            include "shared.thrift"
            service Svc { shared.SharedStruct get(1: i32 key) }
        "#,
        )
        .unwrap();
        let parsed = ThriftParser::new(vec![])
            .parse(dir.path().join("main.thrift").to_str().unwrap())
            .await
            .unwrap();
        let func = &parsed.services[0].functions[0];
        assert_eq!(func.return_type_id, TypeId::Struct);
        assert_eq!(
            func.return_type.as_ref().unwrap().class(),
            Some("SharedStruct")
        );
    }

    #[tokio::test]
    async fn test_doc_comments_captured() {
        let parsed = parse_source(
            r#"
            // A user record.
            struct User { 1: string name }
        "#,
        )
        .await
        .unwrap();
        assert_eq!(parsed.structs[0].doc.as_deref(), Some("A user record."));
    }
}
