//! Route registry: one entry per (path template, method) pair.
//!
//! Every route owns a compiled [`PathPattern`], its declared parameters and a
//! side table mapping each mutable leaf to its [`MutationState`]. Routes are
//! built once from an [`ApiSpec`] and never structurally change afterwards;
//! only mutation state and the seeded corpus evolve.

pub mod mutate;
pub mod pattern;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

use http::Method;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, info};

use crate::corpus::Corpus;
use crate::error::SpecError;
use crate::generate::generate_node;
use crate::har::CapturedRequest;
use crate::schema::{ApiSpec, Location, Operation, Parameter};

pub use mutate::{Leaf, value_text};
pub use pattern::PathPattern;

/// Path substrings excluded from fuzzing unless configured otherwise.
pub const DEFAULT_BLACKLIST: [&str; 3] = ["readonly", "logout", "backup"];

/// Prior values retained per leaf unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 8;

// ============================================================================
// Identifiers
// ============================================================================

/// Index of a route inside its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(pub usize);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identifier of a position inside a parameter's schema tree.
///
/// The identifier is the parameter name followed by every object field name
/// on the way down, joined with `/`. Array elements contribute `[]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    /// Segment used for an array element.
    pub const ELEMENT: &'static str = "[]";

    /// Identifier of a parameter root.
    pub fn root(name: &str) -> Self {
        NodeId(name.to_string())
    }

    /// Identifier of a child position.
    pub fn child(&self, segment: &str) -> Self {
        NodeId(format!("{}/{}", self.0, segment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Mutation state
// ============================================================================

/// Current and recent values of one leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationState {
    next: Option<Value>,
    history: VecDeque<Value>,
    limit: usize,
}

impl MutationState {
    /// Empty state retaining at most `limit` prior values.
    pub fn new(limit: usize) -> Self {
        Self {
            next: None,
            history: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// The value the next request will carry.
    pub fn next(&self) -> Option<&Value> {
        self.next.as_ref()
    }

    /// Prior values, newest first.
    pub fn history(&self) -> impl Iterator<Item = &Value> {
        self.history.iter()
    }

    /// Replace the current value, pushing the previous one into history.
    pub fn set(&mut self, value: Value) {
        if let Some(prev) = self.next.replace(value) {
            if self.limit == 0 {
                return;
            }
            self.history.push_front(prev);
            self.history.truncate(self.limit);
        }
    }
}

// ============================================================================
// Route
// ============================================================================

/// One fuzzable operation.
#[derive(Debug, Clone)]
pub struct Route {
    id: RouteId,
    method: Method,
    pattern: PathPattern,
    parameters: Vec<Parameter>,
    roots: Vec<NodeId>,
    leaves: Vec<Leaf>,
    states: BTreeMap<NodeId, MutationState>,
    corpus: Vec<CapturedRequest>,
}

impl Route {
    /// Register an operation, creating empty mutation state for every leaf.
    pub fn new(id: RouteId, op: &Operation, history_limit: usize) -> Result<Self, SpecError> {
        let pattern = PathPattern::compile(&op.path)?;
        let mut roots: Vec<NodeId> = Vec::with_capacity(op.parameters.len());
        let mut leaves = Vec::new();

        for param in &op.parameters {
            if param.location != Location::Body && !param.schema.is_flat() {
                return Err(SpecError::ObjectOutsideBody {
                    location: format!("{} {} param {}", op.method, op.path, param.name),
                    param_in: param.location.to_string(),
                });
            }
            let mut root = NodeId::root(&param.name);
            if roots.contains(&root) {
                root = NodeId(format!("{}:{}", param.location, param.name));
            }
            mutate::collect_leaves(&root, &param.schema, &mut leaves);
            roots.push(root);
        }

        let states = leaves
            .iter()
            .map(|leaf| (leaf.id.clone(), MutationState::new(history_limit)))
            .collect();

        Ok(Self {
            id,
            method: op.method.clone(),
            pattern,
            parameters: op.parameters.clone(),
            roots,
            leaves,
            states,
            corpus: Vec::new(),
        })
    }

    pub fn id(&self) -> RouteId {
        self.id
    }

    /// Path template, e.g. `/pet/{petId}`.
    pub fn path(&self) -> &str {
        self.pattern.template()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Declared parameters in declaration order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Every mutable leaf in declaration order.
    pub fn leaves(&self) -> &[Leaf] {
        &self.leaves
    }

    /// Recorded requests bound to this route.
    pub fn corpus(&self) -> &[CapturedRequest] {
        &self.corpus
    }

    /// Mutation state of one leaf.
    pub fn state(&self, id: &NodeId) -> Option<&MutationState> {
        self.states.get(id)
    }

    /// Generate a fresh value for every leaf.
    pub fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for leaf in &self.leaves {
            let value = generate_node(&leaf.schema, rng);
            if let Some(state) = self.states.get_mut(&leaf.id) {
                state.set(value);
            }
        }
    }

    /// Current value of the parameter at `index`, assembled from its leaves.
    ///
    /// `None` if the parameter has not been mutated yet.
    pub fn value(&self, index: usize) -> Option<Value> {
        let param = self.parameters.get(index)?;
        let root = self.roots.get(index)?;
        mutate::assemble(root, &param.schema, &self.states)
    }

    /// Every leaf's current value, keyed by leaf identifier.
    ///
    /// These are the values a request built now would carry, and therefore
    /// the candidates a taint check should look for.
    pub fn current_values(&self) -> Vec<(NodeId, Value)> {
        self.leaves
            .iter()
            .filter_map(|leaf| {
                self.states
                    .get(&leaf.id)
                    .and_then(MutationState::next)
                    .map(|v| (leaf.id.clone(), v.clone()))
            })
            .collect()
    }

    pub(crate) fn add_corpus(&mut self, request: CapturedRequest) {
        self.corpus.push(request);
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry construction options.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Path substrings whose operations are never registered
    pub blacklist: Vec<String>,
    /// Prior values retained per leaf
    pub history_limit: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            blacklist: DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// All registered routes, sorted by path template.
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    routes: Vec<Route>,
}

impl RouteRegistry {
    /// Build one route per non-blacklisted operation.
    pub fn build(spec: &ApiSpec, options: &RegistryOptions) -> Result<Self, SpecError> {
        let mut ops: Vec<&Operation> = spec
            .operations
            .iter()
            .filter(|op| {
                let blocked = options
                    .blacklist
                    .iter()
                    .any(|needle| !needle.is_empty() && op.path.contains(needle.as_str()));
                if blocked {
                    debug!(method = %op.method, path = %op.path, "Skipping blacklisted operation");
                }
                !blocked
            })
            .collect();
        ops.sort_by(|a, b| a.path.cmp(&b.path));

        let routes = ops
            .into_iter()
            .enumerate()
            .map(|(i, op)| Route::new(RouteId(i), op, options.history_limit))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            routes = routes.len(),
            skipped = spec.operations.len() - routes.len(),
            "Route registry built"
        );
        Ok(Self { routes })
    }

    /// Find the route for a concrete request path.
    ///
    /// When several templates match, the one with the fewest wildcard
    /// segments wins; remaining ties go to the earliest route.
    pub fn find(&self, path: &str, method: &Method) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|r| r.method == *method && r.pattern.is_match(path))
            .min_by_key(|r| r.pattern.wildcards())
    }

    /// Look up a route by template and method.
    pub fn by_template(&self, template: &str, method: &Method) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| r.path() == template && r.method == *method)
    }

    pub fn get(&self, id: RouteId) -> Option<&Route> {
        self.routes.get(id.0)
    }

    pub fn get_mut(&mut self, id: RouteId) -> Option<&mut Route> {
        self.routes.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Attach every corpus entry to its route.
    ///
    /// Returns the number of routes that received at least one entry.
    pub fn seed(&mut self, corpus: &Corpus) -> usize {
        let mut touched = HashSet::new();
        for entry in corpus.entries() {
            if let Some(route) = self.routes.get_mut(entry.route.0) {
                route.add_corpus(entry.request.clone());
                touched.insert(entry.route);
            }
        }
        touched.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Primitive, SchemaNode};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    fn op(method: Method, path: &str, parameters: Vec<Parameter>) -> Operation {
        Operation {
            path: path.to_string(),
            method,
            parameters,
        }
    }

    fn path_param(name: &str) -> Parameter {
        Parameter {
            location: Location::Path,
            name: name.to_string(),
            required: true,
            schema: SchemaNode::Primitive(Primitive::String),
        }
    }

    fn spec() -> ApiSpec {
        ApiSpec {
            operations: vec![
                op(Method::GET, "/users/{id}", vec![path_param("id")]),
                op(Method::GET, "/users/me", vec![]),
                op(Method::DELETE, "/users/{id}", vec![path_param("id")]),
                op(Method::POST, "/admin/backup", vec![]),
                op(Method::GET, "/logout", vec![]),
                op(Method::GET, "/alpha", vec![]),
            ],
        }
    }

    #[test]
    fn test_blacklist_and_order() {
        let registry = RouteRegistry::build(&spec(), &RegistryOptions::default()).unwrap();
        let paths: Vec<String> = registry.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "GET /alpha",
                "GET /users/me",
                "GET /users/{id}",
                "DELETE /users/{id}"
            ]
        );
        for (i, route) in registry.iter().enumerate() {
            assert_eq!(route.id(), RouteId(i));
        }
    }

    #[test]
    fn test_find_prefers_fewest_wildcards() {
        let registry = RouteRegistry::build(&spec(), &RegistryOptions::default()).unwrap();
        let route = registry.find("/users/me", &Method::GET).unwrap();
        assert_eq!(route.path(), "/users/me");
        let route = registry.find("/users/42", &Method::GET).unwrap();
        assert_eq!(route.path(), "/users/{id}");
        let route = registry.find("/users/42", &Method::DELETE).unwrap();
        assert_eq!(route.method(), &Method::DELETE);
        assert!(registry.find("/users/42", &Method::PUT).is_none());
        assert!(registry.find("/users/42/posts", &Method::GET).is_none());
    }

    #[test]
    fn test_mutation_history_is_bounded() {
        let mut state = MutationState::new(2);
        assert!(state.next().is_none());
        for i in 0..5 {
            state.set(json!(i));
        }
        assert_eq!(state.next(), Some(&json!(4)));
        let history: Vec<&Value> = state.history().collect();
        assert_eq!(history, vec![&json!(3), &json!(2)]);
    }

    #[test]
    fn test_mutate_fills_every_leaf() {
        let body = Parameter {
            location: Location::Body,
            name: "body".to_string(),
            required: true,
            schema: SchemaNode::Object(vec![
                ("name".to_string(), SchemaNode::Primitive(Primitive::String)),
                ("age".to_string(), SchemaNode::Primitive(Primitive::Integer)),
            ]),
        };
        let mut route = Route::new(
            RouteId(0),
            &op(Method::POST, "/users/{id}", vec![path_param("id"), body]),
            4,
        )
        .unwrap();
        assert!(route.value(1).is_none());

        let mut rng = StdRng::seed_from_u64(5);
        route.mutate(&mut rng);
        let first = route.value(1).unwrap();
        assert!(first["name"].is_string());
        assert_eq!(route.current_values().len(), 3);

        route.mutate(&mut rng);
        let name = NodeId::from("body/name");
        let state = route.state(&name).unwrap();
        assert_eq!(state.history().next(), Some(&first["name"]));
    }

    #[test]
    fn test_duplicate_names_get_distinct_roots() {
        let query = Parameter {
            location: Location::Query,
            name: "id".to_string(),
            required: false,
            schema: SchemaNode::Primitive(Primitive::Integer),
        };
        let route = Route::new(
            RouteId(0),
            &op(Method::GET, "/users/{id}", vec![path_param("id"), query]),
            4,
        )
        .unwrap();
        let ids: Vec<&str> = route.leaves().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["id", "query:id"]);
    }

    #[test]
    fn test_object_in_header_rejected() {
        let header = Parameter {
            location: Location::Header,
            name: "X-Filter".to_string(),
            required: false,
            schema: SchemaNode::Object(vec![]),
        };
        let err = Route::new(RouteId(0), &op(Method::GET, "/x", vec![header]), 4).unwrap_err();
        assert!(matches!(err, SpecError::ObjectOutsideBody { .. }));
    }
}
