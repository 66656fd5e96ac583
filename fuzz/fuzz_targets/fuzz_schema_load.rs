#![no_main]

//! Loading arbitrary JSON must either fail with a typed error or produce
//! routes whose requests can always be synthesized after a mutation.

use libfuzzer_sys::fuzz_target;
use rand::SeedableRng;
use rand::rngs::StdRng;
use sqltaint::request::to_request;
use sqltaint::route::{RegistryOptions, RouteRegistry};
use sqltaint::schema::ApiSpec;

fuzz_target!(|data: &[u8]| {
    let Ok(doc) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(spec) = ApiSpec::from_json(&doc) else {
        return;
    };
    let Ok(mut registry) = RouteRegistry::build(&spec, &RegistryOptions::default()) else {
        return;
    };

    let seed = data.iter().fold(0u64, |h, b| h.rotate_left(5) ^ u64::from(*b));
    let mut rng = StdRng::seed_from_u64(seed);
    let ids: Vec<_> = registry.iter().map(|r| r.id()).collect();
    for id in ids {
        let Some(route) = registry.get_mut(id) else {
            continue;
        };
        route.mutate(&mut rng);
        // A route with two body parameters is the only expected failure.
        let _ = to_request(route);
    }
});

