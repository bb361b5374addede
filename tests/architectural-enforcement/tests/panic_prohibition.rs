//! Integration Test: Panic Prohibition
//!
//! **Policy**: Production code in the orchestrator MUST NOT call `unwrap()` or
//! `expect()`. Errors are returned through the module's error enum or handled
//! and logged. Fallbacks such as `unwrap_or_default()` are fine.
//! **Exceptions**: test code

use architectural_enforcement::{find_violations, production_root};

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let violations = find_violations(&production_root(), &[".unwrap()", ".expect("]);

    if !violations.is_empty() {
        eprintln!("\n❌ Panicking calls found in production code:\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        panic!(
            "\nFound {} unwrap()/expect() call(s) in production code.",
            violations.len()
        );
    }
}
