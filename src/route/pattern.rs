//! Path template matching.
//!
//! A template such as `/pet/{petId}/uploadImage` compiles to an anchored
//! regular expression in which every `{name}` token matches exactly one
//! non-empty run of characters inside a single segment. A wildcard never
//! matches `/`.

use regex::Regex;

use crate::error::SpecError;

/// Compiled matcher for one path template.
#[derive(Debug, Clone)]
pub struct PathPattern {
    template: String,
    regex: Regex,
    params: Vec<String>,
}

impl PathPattern {
    /// Compile a path template.
    pub fn compile(template: &str) -> Result<Self, SpecError> {
        let mut body = String::with_capacity(template.len() + 16);
        let mut params = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|c| open + c) else {
                break;
            };
            let name = &rest[open + 1..close];
            if name.is_empty() || name.contains('/') {
                return Err(SpecError::Malformed {
                    location: template.to_string(),
                    what: "path template parameter",
                    fragment: rest[open..=close].to_string(),
                });
            }
            body.push_str(&regex::escape(&rest[..open]));
            body.push_str("([^/]+)");
            params.push(name.to_string());
            rest = &rest[close + 1..];
        }
        body.push_str(&regex::escape(rest));

        let trailing = if body.ends_with('/') { "" } else { "/?" };
        let regex = Regex::new(&format!("^{}{}$", body, trailing)).map_err(|e| {
            SpecError::Malformed {
                location: template.to_string(),
                what: "path template",
                fragment: e.to_string(),
            }
        })?;

        Ok(Self {
            template: template.to_string(),
            regex,
            params,
        })
    }

    /// The template this pattern was compiled from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The compiled regular expression source.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Number of wildcard segments; fewer means more specific.
    pub fn wildcards(&self) -> usize {
        self.params.len()
    }

    /// Whether a concrete path instantiates this template.
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Extract `(name, value)` pairs for every path parameter.
    pub fn captures(&self, path: &str) -> Option<Vec<(String, String)>> {
        let caps = self.regex.captures(path)?;
        Some(
            self.params
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    caps.get(i + 1)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compiled_patterns() {
        let table = [
            ("/a/b/{p1}/c", "^/a/b/([^/]+)/c/?$"),
            ("/d/{p1}/e/{p2}", "^/d/([^/]+)/e/([^/]+)/?$"),
            ("/a/b", "^/a/b/?$"),
            ("/", "^/$"),
        ];
        for (template, expected) in table {
            let pattern = PathPattern::compile(template).unwrap();
            assert_eq!(pattern.as_str(), expected, "{template}");
        }
    }

    #[test]
    fn test_wildcard_does_not_cross_segments() {
        let pattern = PathPattern::compile("/pet/{petId}").unwrap();
        assert!(pattern.is_match("/pet/42"));
        assert!(pattern.is_match("/pet/42/"));
        assert!(!pattern.is_match("/pet/42/uploadImage"));
        assert!(!pattern.is_match("/pet/"));
        assert!(!pattern.is_match("/api/pet/42"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let pattern = PathPattern::compile("/files/{name}.json").unwrap();
        assert!(pattern.is_match("/files/report.json"));
        assert!(!pattern.is_match("/files/reportxjson"));
    }

    #[test]
    fn test_captures_by_name() {
        let pattern = PathPattern::compile("/users/{user}/posts/{post}").unwrap();
        let caps = pattern.captures("/users/alice/posts/7").unwrap();
        assert_eq!(
            caps,
            vec![
                ("user".to_string(), "alice".to_string()),
                ("post".to_string(), "7".to_string())
            ]
        );
        assert_eq!(pattern.wildcards(), 2);
    }

    #[test]
    fn test_empty_parameter_name_rejected() {
        assert!(PathPattern::compile("/users/{}").is_err());
    }

    proptest! {
        #[test]
        fn prop_instantiated_template_matches(value in "[A-Za-z0-9_.~-]{1,24}") {
            let pattern = PathPattern::compile("/store/order/{orderId}/items").unwrap();
            let path = format!("/store/order/{}/items", value);
            prop_assert!(pattern.is_match(&path));
            let caps = pattern.captures(&path).unwrap();
            prop_assert_eq!(&caps[0].1, &value);
        }

        #[test]
        fn prop_slash_never_matches_wildcard(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            let pattern = PathPattern::compile("/x/{id}").unwrap();
            let path = format!("/x/{}/{}", a, b);
            prop_assert!(!pattern.is_match(&path));
        }
    }
}
