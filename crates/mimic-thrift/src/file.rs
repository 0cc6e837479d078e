//! Normalized Thrift type graph.
//!
//! This is the JSON representation persisted as `thrift/<id>.json` and
//! consumed by the codec, the synthesizer and the client builder. Field
//! names follow the persisted format exactly (`typeId`, `elemTypeId`,
//! `req_out`, ...).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of wire type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeId {
    Bool,
    Byte,
    I8,
    I16,
    I32,
    I64,
    Double,
    String,
    Binary,
    Slist,
    Void,
    List,
    Set,
    Map,
    Struct,
    Union,
    Exception,
}

impl TypeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeId::Bool => "bool",
            TypeId::Byte => "byte",
            TypeId::I8 => "i8",
            TypeId::I16 => "i16",
            TypeId::I32 => "i32",
            TypeId::I64 => "i64",
            TypeId::Double => "double",
            TypeId::String => "string",
            TypeId::Binary => "binary",
            TypeId::Slist => "slist",
            TypeId::Void => "void",
            TypeId::List => "list",
            TypeId::Set => "set",
            TypeId::Map => "map",
            TypeId::Struct => "struct",
            TypeId::Union => "union",
            TypeId::Exception => "exception",
        }
    }
}

/// Container or compositional type node, tagged by `typeId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "typeId", rename_all = "lowercase")]
pub enum TypeNode {
    Struct {
        class: String,
    },
    Union {
        class: String,
    },
    Exception {
        class: String,
    },
    #[serde(rename_all = "camelCase")]
    List {
        elem_type_id: TypeId,
        #[serde(skip_serializing_if = "Option::is_none")]
        elem_type: Option<Box<TypeNode>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        extra: Option<ExtraType>,
    },
    #[serde(rename_all = "camelCase")]
    Set {
        elem_type_id: TypeId,
        #[serde(skip_serializing_if = "Option::is_none")]
        elem_type: Option<Box<TypeNode>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        extra: Option<ExtraType>,
    },
    #[serde(rename_all = "camelCase")]
    Map {
        key_type_id: TypeId,
        value_type_id: TypeId,
        #[serde(skip_serializing_if = "Option::is_none")]
        key_type: Option<Box<TypeNode>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        value_type: Option<Box<TypeNode>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        key_extra: Option<ExtraType>,
        #[serde(skip_serializing_if = "Option::is_none")]
        value_extra: Option<ExtraType>,
    },
}

impl TypeNode {
    pub fn class(&self) -> Option<&str> {
        match self {
            TypeNode::Struct { class } | TypeNode::Union { class } | TypeNode::Exception { class } => {
                Some(class)
            }
            _ => None,
        }
    }
}

/// Enum/typedef annotation carried next to the resolved underlying type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "typeId", rename_all = "lowercase")]
pub enum ExtraType {
    Enum { class: String },
    Typedef { class: String },
}

impl ExtraType {
    pub fn class(&self) -> &str {
        match self {
            ExtraType::Enum { class } | ExtraType::Typedef { class } => class,
        }
    }
}

/// Resolved `{typeId, type?, extra?}` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldType {
    #[serde(rename = "typeId")]
    pub type_id: TypeId,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub node: Option<TypeNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<ExtraType>,
}

impl FieldType {
    pub fn scalar(type_id: TypeId) -> Self {
        Self {
            type_id,
            node: None,
            extra: None,
        }
    }
}

/// Three-state requiredness. `req_out` is Thrift's historical default:
/// required on output, optional on input. Never collapse this to a boolean;
/// the codec and synthesizer distinguish all three states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Requiredness {
    #[serde(rename = "req_out")]
    ReqOut,
    #[serde(rename = "required")]
    Required,
    #[serde(rename = "optional")]
    Optional,
}

/// Struct field or function argument. Keys are positive and unique per
/// struct; they are the wire tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub key: i16,
    pub name: String,
    #[serde(flatten)]
    pub ty: FieldType,
    pub required: Requiredness,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    pub members: Vec<EnumMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedefDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(flatten)]
    pub ty: FieldType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    pub is_exception: bool,
    pub is_union: bool,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(flatten)]
    pub ty: FieldType,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDef {
    pub name: String,
    pub return_type_id: TypeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<TypeNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_extra: Option<ExtraType>,
    pub oneway: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    pub arguments: Vec<Field>,
    pub exceptions: Vec<Field>,
}

impl FunctionDef {
    /// The function's return as a resolved field type.
    pub fn return_field_type(&self) -> FieldType {
        FieldType {
            type_id: self.return_type_id,
            node: self.return_type.clone(),
            extra: self.return_extra.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    pub functions: Vec<FunctionDef>,
}

/// One parsed Thrift file (with all includes folded in).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThriftJson {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    pub enums: Vec<EnumDef>,
    pub typedefs: Vec<TypedefDef>,
    pub structs: Vec<StructDef>,
    pub constants: Vec<ConstantDef>,
    pub services: Vec<ServiceDef>,
}

impl ThriftJson {
    pub fn find_struct(&self, name: &str) -> Option<&StructDef> {
        self.structs.iter().find(|s| s.name == name)
    }

    pub fn find_enum(&self, name: &str) -> Option<&EnumDef> {
        self.enums.iter().find(|e| e.name == name)
    }

    pub fn find_service(&self, name: &str) -> Option<&ServiceDef> {
        self.services.iter().find(|s| s.name == name)
    }

    /// All functions reachable from `service`, walking the `extends` chain.
    pub fn service_functions(&self, service: &str) -> Vec<&FunctionDef> {
        let mut functions = Vec::new();
        let mut current = self.find_service(service);
        while let Some(def) = current {
            functions.extend(def.functions.iter());
            current = def.extends.as_deref().and_then(|base| self.find_service(base));
        }
        functions
    }
}

/// Order services so every service appears after the one it extends,
/// preserving relative order within each peel round. Services whose base is
/// missing are appended at the end in encounter order.
pub fn sort_services(services: &[ServiceDef]) -> Vec<&ServiceDef> {
    let mut sorted: Vec<&ServiceDef> = Vec::new();
    let mut resolved: Vec<&str> = vec![""];
    let mut rest: Vec<&ServiceDef> = services.iter().collect();
    loop {
        let (ready, pending): (Vec<&ServiceDef>, Vec<&ServiceDef>) = rest
            .into_iter()
            .partition(|s| resolved.contains(&s.extends.as_deref().unwrap_or("")));
        if ready.is_empty() {
            sorted.extend(pending);
            return sorted;
        }
        resolved.extend(ready.iter().map(|s| s.name.as_str()));
        sorted.extend(ready);
        rest = pending;
    }
}
