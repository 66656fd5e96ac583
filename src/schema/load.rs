//! Conversion from raw OpenAPI v2 JSON into the typed schema model.

use http::Method;
use serde_json::{Map, Value};

use super::{ApiSpec, Location, Operation, Parameter, Primitive, SchemaNode};
use crate::error::SpecError;

/// Methods an OpenAPI v2 path item may declare, in the order routes are
/// emitted for a single path.
const METHODS: [(&str, Method); 7] = [
    ("get", Method::GET),
    ("put", Method::PUT),
    ("post", Method::POST),
    ("delete", Method::DELETE),
    ("options", Method::OPTIONS),
    ("head", Method::HEAD),
    ("patch", Method::PATCH),
];

/// Longest fragment quoted in an error message.
const MAX_FRAGMENT: usize = 256;

pub(super) fn load_document(doc: &Value) -> Result<ApiSpec, SpecError> {
    let paths = doc
        .get("paths")
        .ok_or_else(|| missing("document", "paths", doc))?;
    let paths = as_object(paths, "document", "paths object")?;

    let mut operations = Vec::new();
    for (path, item) in paths {
        let item = as_object(item, path, "path item")?;
        let shared = match item.get("parameters") {
            Some(params) => load_parameters(params, path)?,
            None => Vec::new(),
        };

        for (key, method) in METHODS.iter() {
            let Some(op) = item.get(*key) else { continue };
            let location = format!("{} {}", method, path);
            let op = as_object(op, &location, "operation")?;
            let own = match op.get("parameters") {
                Some(params) => load_parameters(params, &location)?,
                None => Vec::new(),
            };
            operations.push(Operation {
                path: path.clone(),
                method: method.clone(),
                parameters: merge_parameters(&shared, own),
            });
        }
    }

    Ok(ApiSpec { operations })
}

/// Operation-level parameters override path-level ones with the same
/// location and name.
fn merge_parameters(shared: &[Parameter], own: Vec<Parameter>) -> Vec<Parameter> {
    let mut merged: Vec<Parameter> = shared
        .iter()
        .filter(|p| {
            !own.iter()
                .any(|o| o.location == p.location && o.name == p.name)
        })
        .cloned()
        .collect();
    merged.extend(own);
    merged
}

fn load_parameters(params: &Value, location: &str) -> Result<Vec<Parameter>, SpecError> {
    let Value::Array(params) = params else {
        return Err(malformed(location, "parameters array", params));
    };
    params
        .iter()
        .map(|param| load_parameter(param, location))
        .collect()
}

fn load_parameter(raw: &Value, location: &str) -> Result<Parameter, SpecError> {
    let obj = as_object(raw, location, "parameter")?;
    reject_ref(obj, location)?;

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| missing(location, "name", raw))?
        .to_string();
    let param_in = obj
        .get("in")
        .and_then(Value::as_str)
        .ok_or_else(|| missing(location, "in", raw))?;
    let here = format!("{} param {}", location, name);
    let param_location =
        Location::from_openapi(param_in).ok_or_else(|| SpecError::UnknownLocation {
            location: here.clone(),
            param_in: param_in.to_string(),
        })?;

    let schema = if param_location == Location::Body {
        let schema = obj
            .get("schema")
            .ok_or_else(|| missing(&here, "schema", raw))?;
        load_schema(schema, &here)?
    } else {
        load_flat(raw, &here, param_location)?
    };

    // Path parameters are always required regardless of what the document says.
    let required = param_location == Location::Path
        || obj.get("required").and_then(Value::as_bool).unwrap_or(false);

    Ok(Parameter {
        location: param_location,
        name,
        required,
        schema,
    })
}

/// Non-body parameters and their `items` carry a restricted shape: primitive,
/// enum, or array of those.
fn load_flat(raw: &Value, location: &str, param_in: Location) -> Result<SchemaNode, SpecError> {
    let obj = as_object(raw, location, "items")?;
    reject_ref(obj, location)?;

    if let Some(values) = obj.get("enum") {
        return load_enum(values, location);
    }

    let kind = declared_type(obj, raw, location)?;
    match kind {
        "object" => Err(SpecError::ObjectOutsideBody {
            location: location.to_string(),
            param_in: param_in.to_string(),
        }),
        "array" => {
            let items = obj
                .get("items")
                .ok_or_else(|| missing(location, "items", raw))?;
            let items = load_flat(items, &format!("{}[]", location), param_in)?;
            Ok(SchemaNode::Array(Box::new(items)))
        }
        other => primitive(other, location, raw),
    }
}

/// Body schemas may nest arbitrarily.
fn load_schema(raw: &Value, location: &str) -> Result<SchemaNode, SpecError> {
    let obj = as_object(raw, location, "schema")?;
    reject_ref(obj, location)?;

    if let Some(values) = obj.get("enum") {
        return load_enum(values, location);
    }

    let kind = declared_type(obj, raw, location)?;
    match kind {
        "object" => {
            let mut fields = Vec::new();
            if let Some(props) = obj.get("properties") {
                let props = as_object(props, location, "properties")?;
                for (name, prop) in props {
                    let field = load_schema(prop, &format!("{}.{}", location, name))?;
                    fields.push((name.clone(), field));
                }
            }
            Ok(SchemaNode::Object(fields))
        }
        "array" => {
            let items = obj
                .get("items")
                .ok_or_else(|| missing(location, "items", raw))?;
            if items.is_array() {
                return Err(malformed(location, "single items schema (tuple items)", items));
            }
            let element = load_schema(items, &format!("{}[]", location))?;
            Ok(SchemaNode::Array(Box::new(element)))
        }
        other => primitive(other, location, raw),
    }
}

fn load_enum(values: &Value, location: &str) -> Result<SchemaNode, SpecError> {
    match values {
        Value::Array(values) if !values.is_empty() => Ok(SchemaNode::Enum(values.clone())),
        other => Err(malformed(location, "non-empty enum", other)),
    }
}

/// `type` may be a string or, in loosely written documents, a list whose
/// first non-null entry wins.
fn declared_type<'a>(
    obj: &'a Map<String, Value>,
    raw: &Value,
    location: &str,
) -> Result<&'a str, SpecError> {
    match obj.get("type") {
        Some(Value::String(kind)) => Ok(kind.as_str()),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .filter_map(Value::as_str)
            .find(|k| *k != "null")
            .ok_or_else(|| missing(location, "type", raw)),
        Some(other) => Err(malformed(location, "type name", other)),
        None => Err(missing(location, "type", raw)),
    }
}

fn primitive(kind: &str, location: &str, raw: &Value) -> Result<SchemaNode, SpecError> {
    Primitive::from_type_name(kind)
        .map(SchemaNode::Primitive)
        .ok_or_else(|| SpecError::UnsupportedType {
            location: location.to_string(),
            kind: kind.to_string(),
            fragment: fragment(raw),
        })
}

fn reject_ref(obj: &Map<String, Value>, location: &str) -> Result<(), SpecError> {
    match obj.get("$ref") {
        Some(reference) => Err(SpecError::UnexpandedRef {
            location: location.to_string(),
            reference: reference.as_str().unwrap_or_default().to_string(),
        }),
        None => Ok(()),
    }
}

fn as_object<'a>(
    value: &'a Value,
    location: &str,
    what: &'static str,
) -> Result<&'a Map<String, Value>, SpecError> {
    value.as_object().ok_or_else(|| malformed(location, what, value))
}

fn missing(location: &str, field: &'static str, raw: &Value) -> SpecError {
    SpecError::MissingField {
        location: location.to_string(),
        field,
        fragment: fragment(raw),
    }
}

fn malformed(location: &str, what: &'static str, raw: &Value) -> SpecError {
    SpecError::Malformed {
        location: location.to_string(),
        what,
        fragment: fragment(raw),
    }
}

fn fragment(raw: &Value) -> String {
    let mut text = raw.to_string();
    if text.len() > MAX_FRAGMENT {
        let mut cut = MAX_FRAGMENT;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}
