#![no_main]

//! Statement extraction and taint search must never panic, whatever the
//! log message or candidate value.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sqltaint::taint::pglog::{bind_parameters, sanitize};
use sqltaint::taint::{Candidate, search};

#[derive(Debug, Arbitrary)]
struct Input {
    message: String,
    detail: String,
    values: Vec<String>,
}

fuzz_target!(|input: Input| {
    let Some(statement) = sanitize(&input.message) else {
        return;
    };
    let statement = bind_parameters(&statement, &input.detail);
    let candidates: Vec<Candidate> = input
        .values
        .into_iter()
        .take(8)
        .enumerate()
        .map(|(i, v)| Candidate::new(format!("param{i}"), v))
        .collect();
    let _ = search(&statement, &candidates);
});
