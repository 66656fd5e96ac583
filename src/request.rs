//! Request synthesis.
//!
//! [`to_request`] turns a route's current mutation state into an
//! [`HttpRequest`] that carries everything except the target's scheme and
//! authority, which the transport supplies.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde_json::Value;
use tracing::debug;
use url::Url;
use url::form_urlencoded;

use crate::error::SynthesizeError;
use crate::har::CapturedRequest;
use crate::route::{Route, value_text};
use crate::schema::Location;

/// Hop-by-hop and transport headers that are never replayed verbatim.
const SKIPPED_HEADERS: [&str; 5] = ["host", "content-length", "connection", "cookie", ":authority"];

/// A target-independent HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute path, e.g. `/pet/42`
    pub path: String,
    /// Already-encoded query string without the leading `?`
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Resolve against a target base URL, keeping any base path prefix.
    pub fn url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        let prefix = base.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", prefix, self.path));
        url.set_query(self.query.as_deref());
        url
    }
}

impl From<&CapturedRequest> for HttpRequest {
    fn from(captured: &CapturedRequest) -> Self {
        let mut req = HttpRequest::new(captured.method.clone(), captured.url.path());
        req.query = captured.url.query().map(str::to_string);

        for (name, value) in &captured.headers {
            let lower = name.to_ascii_lowercase();
            if lower.starts_with(':') || SKIPPED_HEADERS.contains(&lower.as_str()) {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    req.headers.append(name, value);
                }
                _ => debug!(header = %name, "Dropping unencodable recorded header"),
            }
        }

        if !captured.cookies.is_empty() {
            let cookie = captured
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                req.headers.insert(COOKIE, value);
            }
        }

        req.body = captured.body.clone().map(Bytes::from);
        req
    }
}

/// Build a request from the route's current parameter values.
///
/// Every required parameter must have been mutated. Path parameters are
/// always required.
pub fn to_request(route: &Route) -> Result<HttpRequest, SynthesizeError> {
    let bodies = route
        .parameters()
        .iter()
        .filter(|p| p.location == Location::Body)
        .count();
    if bodies > 1 {
        return Err(SynthesizeError::MultipleBodies {
            method: route.method().to_string(),
            path: route.path().to_string(),
        });
    }

    let mut path = route.path().to_string();
    let mut query = form_urlencoded::Serializer::new(String::new());
    let mut has_query = false;
    let mut form = form_urlencoded::Serializer::new(String::new());
    let mut has_form = false;
    let mut headers = HeaderMap::new();
    let mut body = None;

    for (i, param) in route.parameters().iter().enumerate() {
        let value = match route.value(i) {
            Some(v) => v,
            None if param.required || param.location == Location::Path => {
                return Err(SynthesizeError::MissingValue {
                    method: route.method().to_string(),
                    path: route.path().to_string(),
                    location: param.location.to_string(),
                    name: param.name.clone(),
                });
            }
            None => continue,
        };

        match param.location {
            Location::Path => {
                path = path.replace(&format!("{{{}}}", param.name), &value_text(&value));
            }
            Location::Query => {
                query.append_pair(&param.name, &value_text(&value));
                has_query = true;
            }
            Location::Header => {
                let (name, value) = header(&param.name, &value)?;
                headers.insert(name, value);
            }
            Location::Body => {
                body = Some(Bytes::from(json_bytes(&value)));
            }
            Location::Form => {
                form.append_pair(&param.name, &value_text(&value));
                has_form = true;
            }
        }
    }

    if body.is_some() {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    } else if has_form {
        body = Some(Bytes::from(form.finish()));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
    }

    Ok(HttpRequest {
        method: route.method().clone(),
        path,
        query: has_query.then(|| query.finish()),
        headers,
        body,
    })
}

fn header(name: &str, value: &Value) -> Result<(HeaderName, HeaderValue), SynthesizeError> {
    let header_name =
        HeaderName::from_bytes(name.as_bytes()).map_err(|e| SynthesizeError::Header {
            name: name.to_string(),
            details: e.to_string(),
        })?;
    let header_value =
        HeaderValue::from_str(&value_text(value)).map_err(|e| SynthesizeError::Header {
            name: name.to_string(),
            details: e.to_string(),
        })?;
    Ok((header_name, header_value))
}

fn json_bytes(value: &Value) -> Vec<u8> {
    // Serializing a Value cannot fail: keys are always strings.
    serde_json::to_vec(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteId;
    use crate::schema::{Operation, Parameter, Primitive, SchemaNode};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn param(location: Location, name: &str, required: bool, schema: SchemaNode) -> Parameter {
        Parameter {
            location,
            name: name.to_string(),
            required,
            schema,
        }
    }

    fn string() -> SchemaNode {
        SchemaNode::Primitive(Primitive::String)
    }

    fn route(method: Method, path: &str, parameters: Vec<Parameter>) -> Route {
        let op = Operation {
            path: path.to_string(),
            method,
            parameters,
        };
        Route::new(RouteId(0), &op, 4).unwrap()
    }

    #[test]
    fn test_requires_mutation_first() {
        let route = route(
            Method::GET,
            "/pet/{petId}",
            vec![param(Location::Path, "petId", true, string())],
        );
        let err = to_request(&route).unwrap_err();
        assert!(matches!(err, SynthesizeError::MissingValue { ref name, .. } if name == "petId"));
    }

    #[test]
    fn test_path_query_header_and_body() {
        let mut route = route(
            Method::PUT,
            "/store/{storeId}/pet/{petId}",
            vec![
                param(Location::Path, "storeId", true, string()),
                param(Location::Path, "petId", true, SchemaNode::Primitive(Primitive::Integer)),
                param(Location::Query, "status", false, string()),
                param(
                    Location::Query,
                    "tags",
                    false,
                    SchemaNode::Array(Box::new(string())),
                ),
                param(Location::Header, "X-Trace", false, string()),
                param(
                    Location::Body,
                    "body",
                    true,
                    SchemaNode::Object(vec![("name".to_string(), string())]),
                ),
            ],
        );
        let mut rng = StdRng::seed_from_u64(11);
        route.mutate(&mut rng);
        let req = to_request(&route).unwrap();

        assert_eq!(req.method, Method::PUT);
        assert!(!req.path.contains('{'));
        assert!(route.pattern().is_match(&req.path));

        let query = req.query.as_deref().unwrap();
        assert!(query.starts_with("status="));
        assert!(query.contains("&tags="));

        assert!(req.headers.contains_key("x-trace"));
        assert_eq!(req.headers[CONTENT_TYPE], "application/json");
        let body: Value = serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["name"], route.value(5).unwrap()["name"]);
    }

    #[test]
    fn test_form_body() {
        let mut route = route(
            Method::POST,
            "/login",
            vec![
                param(Location::Form, "user", true, string()),
                param(Location::Form, "pass", true, string()),
            ],
        );
        route.mutate(&mut StdRng::seed_from_u64(2));
        let req = to_request(&route).unwrap();
        assert_eq!(req.headers[CONTENT_TYPE], "application/x-www-form-urlencoded");
        let body = String::from_utf8(req.body.unwrap().to_vec()).unwrap();
        assert!(body.starts_with("user="));
        assert!(body.contains("&pass="));
    }

    #[test]
    fn test_multiple_bodies_rejected() {
        let body = || param(Location::Body, "b", true, SchemaNode::Object(vec![]));
        let route = route(Method::POST, "/x", vec![body(), body()]);
        assert!(matches!(
            to_request(&route),
            Err(SynthesizeError::MultipleBodies { .. })
        ));
    }

    #[test]
    fn test_url_keeps_base_prefix() {
        let mut req = HttpRequest::new(Method::GET, "/pet/1");
        req.query = Some("a=b".to_string());
        let base = Url::parse("http://localhost:8080/api/v2/").unwrap();
        assert_eq!(
            req.url(&base).as_str(),
            "http://localhost:8080/api/v2/pet/1?a=b"
        );
        let base = Url::parse("http://localhost:8080").unwrap();
        assert_eq!(req.url(&base).as_str(), "http://localhost:8080/pet/1?a=b");
    }

    #[test]
    fn test_from_captured_request() {
        let captured = CapturedRequest {
            index: 0,
            method: Method::POST,
            url: Url::parse("http://recorded:3000/login?next=%2Fhome").unwrap(),
            headers: vec![
                ("Host".to_string(), "recorded:3000".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
                (":authority".to_string(), "recorded".to_string()),
            ],
            cookies: vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ],
            body: Some("{}".to_string()),
            status: None,
        };
        let req = HttpRequest::from(&captured);
        assert_eq!(req.path, "/login");
        assert_eq!(req.query.as_deref(), Some("next=%2Fhome"));
        assert!(!req.headers.contains_key("host"));
        assert_eq!(req.headers[COOKIE], "a=1; b=2");
        assert_eq!(req.body.as_deref(), Some(&b"{}"[..]));
    }
}
