//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the orchestrator MUST NOT call sleep methods.
//! Turn deadlines use `tokio::time::timeout`; waiting uses channels and
//! cancellation tokens.
//! **Exceptions**: test code

use architectural_enforcement::{find_violations, production_root};

#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_violations(&production_root(), &["::sleep(", ".sleep(", "sleep_until("]);

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use instead:");
        eprintln!("  - tokio::time::timeout() for deadlines");
        eprintln!("  - CancellationToken / channel receives to wait for events");

        panic!("\nFound {} sleep violation(s) in production code.", violations.len());
    }
}
