//! Random value generation for schema nodes and parameters.
//!
//! Generation is pure: it reads the schema tree and returns a fresh
//! [`serde_json::Value`], never touching mutation state. Arrays always hold
//! exactly one element so request size stays bounded and each mutation
//! decision stays local to its parameter.

use rand::Rng;
use rand::seq::IndexedRandom;
use serde_json::{Map, Value};

use crate::error::SpecError;
use crate::schema::{Location, Parameter, Primitive, SchemaNode};

/// Generate a value conforming to `node`.
pub fn generate_node<R: Rng + ?Sized>(node: &SchemaNode, rng: &mut R) -> Value {
    match node {
        SchemaNode::Primitive(kind) => random_primitive(*kind, rng),
        SchemaNode::Enum(values) => pick_enum(values, rng),
        SchemaNode::Array(items) => Value::Array(vec![generate_node(items, rng)]),
        SchemaNode::Object(fields) => {
            let mut obj = Map::with_capacity(fields.len());
            for (name, field) in fields {
                obj.insert(name.clone(), generate_node(field, rng));
            }
            Value::Object(obj)
        }
    }
}

/// Generate a value for a declared parameter.
///
/// Objects are only permitted in body parameters; finding one anywhere else
/// means the specification is unsupported.
pub fn generate_parameter<R: Rng + ?Sized>(
    param: &Parameter,
    rng: &mut R,
) -> Result<Value, SpecError> {
    if param.location != Location::Body && !param.schema.is_flat() {
        return Err(SpecError::ObjectOutsideBody {
            location: format!("param {}", param.name),
            param_in: param.location.to_string(),
        });
    }
    Ok(generate_node(&param.schema, rng))
}

/// Generate a scalar of the given kind.
///
/// Strings are random UUIDs: unique enough that finding one verbatim in a
/// query log is unambiguous.
pub fn random_primitive<R: Rng + ?Sized>(kind: Primitive, rng: &mut R) -> Value {
    match kind {
        Primitive::String => Value::String(random_token(rng)),
        Primitive::Integer | Primitive::Number => Value::from(rng.random::<u32>()),
        Primitive::Boolean => Value::Bool(rng.random_bool(0.5)),
    }
}

/// Select uniformly among declared enum values.
pub fn pick_enum<R: Rng + ?Sized>(values: &[Value], rng: &mut R) -> Value {
    values.choose(rng).cloned().unwrap_or(Value::Null)
}

fn random_token<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}
