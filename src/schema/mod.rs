//! In-memory model of an OpenAPI v2 document.
//!
//! The model is built once by [`ApiSpec::load`] and is read-only afterwards.
//! References must already be expanded: a surviving `$ref` is rejected at
//! load time rather than resolved lazily.

mod load;

use http::Method;
use serde_json::Value;
use std::fmt;
use std::path::Path;

use crate::error::SpecError;

/// Primitive JSON value kinds a parameter or leaf may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// `type: string`
    String,
    /// `type: number`
    Number,
    /// `type: integer`
    Integer,
    /// `type: boolean`
    Boolean,
}

impl Primitive {
    /// Parse a declared type name, returning `None` for anything that is not
    /// a primitive (including `object` and `array`).
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Primitive::String),
            "number" => Some(Primitive::Number),
            "integer" => Some(Primitive::Integer),
            "boolean" => Some(Primitive::Boolean),
            _ => None,
        }
    }
}

/// A typed, finite description of a JSON value shape.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    /// A scalar of the given kind.
    Primitive(Primitive),
    /// One of a fixed set of values.
    Enum(Vec<Value>),
    /// A homogeneous sequence.
    Array(Box<SchemaNode>),
    /// A record with fields in declaration order.
    Object(Vec<(String, SchemaNode)>),
}

impl SchemaNode {
    /// Whether the node holds no nested object, i.e. it is safe to send in a
    /// query string, path segment or header.
    pub fn is_flat(&self) -> bool {
        match self {
            SchemaNode::Primitive(_) | SchemaNode::Enum(_) => true,
            SchemaNode::Array(items) => items.is_flat(),
            SchemaNode::Object(_) => false,
        }
    }

    /// Whether mutation treats the node as a single unit.
    ///
    /// Primitives, enums and arrays of flat elements are leaves; objects and
    /// arrays of objects are structure whose leaves are mutated separately.
    pub fn is_leaf(&self) -> bool {
        self.is_flat()
    }
}

/// Where a parameter travels in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    /// Substituted into a `{name}` path segment.
    Path,
    /// Appended to the query string.
    Query,
    /// Sent as a request header.
    Header,
    /// Serialized as the JSON request body.
    Body,
    /// Sent as a urlencoded form field.
    Form,
}

impl Location {
    /// Parse the OpenAPI `in` value.
    pub fn from_openapi(value: &str) -> Option<Self> {
        match value {
            "path" => Some(Location::Path),
            "query" => Some(Location::Query),
            "header" => Some(Location::Header),
            "body" => Some(Location::Body),
            "formData" | "form" => Some(Location::Form),
            _ => None,
        }
    }

    /// The OpenAPI spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Path => "path",
            Location::Query => "query",
            Location::Header => "header",
            Location::Body => "body",
            Location::Form => "formData",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared operation parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Where the parameter travels
    pub location: Location,
    /// Declared name
    pub name: String,
    /// Whether the operation requires it
    pub required: bool,
    /// Value shape. Only body parameters may hold objects.
    pub schema: SchemaNode,
}

/// One (path, method) pair from the document.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Path template, e.g. `/pet/{petId}`
    pub path: String,
    /// HTTP method
    pub method: Method,
    /// Parameters in declaration order (path-level first, then operation-level)
    pub parameters: Vec<Parameter>,
}

/// A loaded specification document.
#[derive(Debug, Clone, Default)]
pub struct ApiSpec {
    /// Every operation in document order.
    pub operations: Vec<Operation>,
}

impl ApiSpec {
    /// Read and validate a specification from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| SpecError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&data)
    }

    /// Parse and validate a specification held in memory.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str) -> Result<Self, SpecError> {
        let doc: Value = serde_json::from_str(data)?;
        Self::from_json(&doc)
    }

    /// Validate an already-parsed document.
    pub fn from_json(doc: &Value) -> Result<Self, SpecError> {
        load::load_document(doc)
    }

    /// Look up an operation by its template and method.
    pub fn operation(&self, path: &str, method: &Method) -> Option<&Operation> {
        self.operations
            .iter()
            .find(|op| op.path == path && op.method == *method)
    }
}
