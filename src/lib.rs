//! sqltaint - black-box HTTP API fuzzer with SQL taint detection.
//!
//! Routes are built from an OpenAPI v2 description, seeded with recorded
//! traffic, and fuzzed one request at a time. After every response the
//! database's CSV query log is tailed and each newly logged statement is
//! searched for the values that were just sent. A value that reaches a
//! statement verbatim is reported with the table, column and action it
//! landed in.
//!
//! # Pipeline
//!
//! - [`schema`] loads the API description.
//! - [`route`] registers one route per operation and owns mutation state.
//! - [`generate`] produces typed random values for schema nodes.
//! - [`request`] turns a route's current values into an HTTP request.
//! - [`corpus`] binds recorded ([`har`]) requests to routes.
//! - [`taint`] tails the query log and locates tainted statements.
//! - [`fuzz`] runs the loop and records [`findings`].

pub mod client;
pub mod config;
pub mod corpus;
pub mod coverage;
pub mod error;
pub mod findings;
pub mod fuzz;
pub mod generate;
pub mod har;
pub mod logging;
pub mod metrics;
pub mod request;
pub mod route;
pub mod schema;
pub mod taint;
pub mod timeout;
