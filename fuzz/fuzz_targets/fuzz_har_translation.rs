#![no_main]

//! Arbitrary recordings must translate without panicking, and every bound
//! entry must point at a route whose pattern matches the recorded path.

use libfuzzer_sys::fuzz_target;
use sqltaint::corpus::translate;
use sqltaint::har::Har;
use sqltaint::route::{RegistryOptions, RouteRegistry};
use sqltaint::schema::ApiSpec;

const SPEC: &str = r#"{
    "paths": {
        "/cities": {"get": {}, "post": {}},
        "/cities/{name}": {
            "parameters": [{"in": "path", "name": "name", "type": "string"}],
            "get": {}, "delete": {}
        },
        "/pets/mine": {"get": {}},
        "/pets/{petId}/tags/{tag}": {
            "get": {"parameters": [
                {"in": "path", "name": "petId", "type": "integer"},
                {"in": "path", "name": "tag", "type": "string"}
            ]}
        }
    }
}"#;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(har) = Har::from_str(text) else {
        return;
    };
    let Ok(spec) = ApiSpec::from_str(SPEC) else {
        return;
    };
    let Ok(mut registry) = RouteRegistry::build(&spec, &RegistryOptions::default()) else {
        return;
    };

    let corpus = translate(&registry, &har);
    assert_eq!(corpus.len() + corpus.skipped().len(), har.entries().len());
    for entry in corpus.entries() {
        let route = registry.get(entry.route).expect("bound route exists");
        assert!(route.pattern().is_match(entry.request.path()));
    }
    registry.seed(&corpus);
});
