//! Leaf discovery and value assembly over the mutation side table.
//!
//! A parameter's schema tree is walked once at registration to assign a
//! [`NodeId`] to every leaf. Mutation regenerates the value of each leaf
//! independently; assembly walks the same tree again and rebuilds the full
//! parameter value from the leaves' current values.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::{MutationState, NodeId};
use crate::schema::SchemaNode;

/// A mutable position inside a parameter's schema tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// Stable identifier of the position
    pub id: NodeId,
    /// Schema of the leaf value
    pub schema: SchemaNode,
}

/// Append every leaf reachable from `node` to `out`, in declaration order.
pub(crate) fn collect_leaves(id: &NodeId, node: &SchemaNode, out: &mut Vec<Leaf>) {
    if node.is_leaf() {
        out.push(Leaf {
            id: id.clone(),
            schema: node.clone(),
        });
        return;
    }
    match node {
        SchemaNode::Object(fields) => {
            for (name, field) in fields {
                collect_leaves(&id.child(name), field, out);
            }
        }
        SchemaNode::Array(items) => collect_leaves(&id.child(NodeId::ELEMENT), items, out),
        SchemaNode::Primitive(_) | SchemaNode::Enum(_) => {}
    }
}

/// Rebuild the value rooted at `id` from the current leaf values.
///
/// Returns `None` if any leaf below `id` has never been mutated.
pub(crate) fn assemble(
    id: &NodeId,
    node: &SchemaNode,
    states: &BTreeMap<NodeId, MutationState>,
) -> Option<Value> {
    if node.is_leaf() {
        return states.get(id).and_then(|s| s.next().cloned());
    }
    match node {
        SchemaNode::Object(fields) => {
            let mut obj = Map::with_capacity(fields.len());
            for (name, field) in fields {
                obj.insert(name.clone(), assemble(&id.child(name), field, states)?);
            }
            Some(Value::Object(obj))
        }
        SchemaNode::Array(items) => Some(Value::Array(vec![assemble(
            &id.child(NodeId::ELEMENT),
            items,
            states,
        )?])),
        SchemaNode::Primitive(_) | SchemaNode::Enum(_) => None,
    }
}

/// Render a leaf value the way it appears inside a logged SQL statement.
///
/// Strings are used verbatim, numbers and booleans by their JSON spelling,
/// and flat arrays are joined with `,`.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_text)
            .collect::<Vec<_>>()
            .join(","),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Primitive;
    use serde_json::json;

    fn pet() -> SchemaNode {
        SchemaNode::Object(vec![
            ("id".to_string(), SchemaNode::Primitive(Primitive::Integer)),
            (
                "category".to_string(),
                SchemaNode::Object(vec![(
                    "name".to_string(),
                    SchemaNode::Primitive(Primitive::String),
                )]),
            ),
            (
                "tags".to_string(),
                SchemaNode::Array(Box::new(SchemaNode::Object(vec![(
                    "name".to_string(),
                    SchemaNode::Primitive(Primitive::String),
                )]))),
            ),
            (
                "photoUrls".to_string(),
                SchemaNode::Array(Box::new(SchemaNode::Primitive(Primitive::String))),
            ),
        ])
    }

    #[test]
    fn test_leaf_identifiers() {
        let mut leaves = Vec::new();
        collect_leaves(&NodeId::root("body"), &pet(), &mut leaves);
        let ids: Vec<&str> = leaves.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "body/id",
                "body/category/name",
                "body/tags/[]/name",
                "body/photoUrls"
            ]
        );
    }

    #[test]
    fn test_assemble_from_leaves() {
        let mut states = BTreeMap::new();
        let mut set = |id: &str, v: Value| {
            let mut state = MutationState::new(4);
            state.set(v);
            states.insert(NodeId::from(id), state);
        };
        set("body/id", json!(7));
        set("body/category/name", json!("dogs"));
        set("body/tags/[]/name", json!("friendly"));
        set("body/photoUrls", json!(["a"]));

        let value = assemble(&NodeId::root("body"), &pet(), &states).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 7,
                "category": {"name": "dogs"},
                "tags": [{"name": "friendly"}],
                "photoUrls": ["a"]
            })
        );
    }

    #[test]
    fn test_assemble_requires_every_leaf() {
        let mut states = BTreeMap::new();
        let mut state = MutationState::new(4);
        state.set(json!(7));
        states.insert(NodeId::from("body/id"), state);
        assert!(assemble(&NodeId::root("body"), &pet(), &states).is_none());
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!("sunnyvale")), "sunnyvale");
        assert_eq!(value_text(&json!(60)), "60");
        assert_eq!(value_text(&json!(true)), "true");
        assert_eq!(value_text(&json!(["a", 2])), "a,2");
    }
}
