//! Corpus translation against the fixture API and recording.

mod common;

use http::Method;
use sqltaint::corpus::translate;
use sqltaint::error::ItemError;
use sqltaint::har::Har;
use sqltaint::request::to_request;
use sqltaint::route::{RegistryOptions, RouteRegistry};
use sqltaint::schema::ApiSpec;

fn registry() -> RouteRegistry {
    let spec = ApiSpec::load(common::fixture("cities.json")).unwrap();
    RouteRegistry::build(&spec, &RegistryOptions::default()).unwrap()
}

#[test]
fn test_blacklisted_route_not_registered() {
    let registry = registry();
    assert_eq!(registry.len(), 7);
    assert!(registry.iter().all(|r| !r.path().contains("backup")));
}

#[test]
fn test_translate_binds_and_skips() -> anyhow::Result<()> {
    let registry = registry();
    let har = Har::load(common::fixture("cities.har"))?;
    let corpus = translate(&registry, &har);

    assert_eq!(corpus.len(), 6);
    assert_eq!(corpus.skipped().len(), 2);
    assert!(
        corpus
            .skipped()
            .iter()
            .all(|e| matches!(e, ItemError::Unmatched { .. }))
    );

    let bound: Vec<(String, String)> = corpus
        .entries()
        .iter()
        .map(|e| {
            let route = registry
                .get(e.route)
                .ok_or_else(|| anyhow::anyhow!("unbound route {}", e.route))?;
            Ok((route.method().to_string(), route.path().to_string()))
        })
        .collect::<anyhow::Result<_>>()?;
    assert_eq!(
        bound,
        vec![
            ("GET".to_string(), "/cities".to_string()),
            ("POST".to_string(), "/cities".to_string()),
            ("GET".to_string(), "/cities/{name}".to_string()),
            ("GET".to_string(), "/pets/mine".to_string()),
            ("GET".to_string(), "/pets/{petId}".to_string()),
            ("DELETE".to_string(), "/cities/{name}".to_string()),
        ]
    );

    let post = &corpus.entries()[1].request;
    assert_eq!(post.body.as_deref(), Some(r#"{"name": "sunnyvale", "temp": 70}"#));
    assert!(corpus.entries()[0].request.body.is_none());
    Ok(())
}

#[test]
fn test_translation_is_idempotent() {
    let registry = registry();
    let har = Har::load(common::fixture("cities.har")).unwrap();
    let first = translate(&registry, &har);
    let second = translate(&registry, &har);
    assert_eq!(first.len(), second.len());
    let key = |c: &sqltaint::corpus::Corpus| -> Vec<(Method, String)> {
        c.entries()
            .iter()
            .map(|e| (e.request.method.clone(), e.request.path().to_string()))
            .collect()
    };
    assert_eq!(key(&first), key(&second));
}

#[test]
fn test_seeded_routes_synthesize_matching_paths() {
    let mut registry = registry();
    let har = Har::load(common::fixture("cities.har")).unwrap();
    let corpus = translate(&registry, &har);
    assert_eq!(registry.seed(&corpus), 6);

    let mut rng = rand::rng();
    let ids: Vec<_> = registry.iter().map(|r| r.id()).collect();
    for id in ids {
        let route = registry.get_mut(id).unwrap();
        route.mutate(&mut rng);
        let request = to_request(route).unwrap();
        assert!(
            route.pattern().is_match(&request.path),
            "{} did not match {}",
            request.path,
            route.pattern().as_str()
        );
        let found = registry.find(&request.path, &request.method).unwrap();
        assert_eq!(found.path(), registry.get(id).unwrap().path());
    }
}
