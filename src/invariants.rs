//! Runtime invariant checks with contract verification for tests.
//!
//! Pipeline code states its invariants with [`assert_invariant!`]. Each check
//! is recorded in a thread-local log so a test can later assert, through
//! [`contract_test`], that the code path it exercised really checked them.
//!
//! ```rust,ignore
//! assert_invariant!(
//!     released_once,
//!     "Composite is released at most once",
//!     "processor::release_frame"
//! );
//!
//! #[test]
//! fn contract_release() {
//!     // ... drive the processor ...
//!     contract_test("release", &["Composite is released at most once"]);
//! }
//! ```
//!
//! The log is per thread: invariants checked on worker threads are only
//! visible to contracts asserted on those same threads.

use std::cell::RefCell;
use std::collections::HashSet;

thread_local! {
    static CHECKED: RefCell<HashSet<&'static str>> = RefCell::new(HashSet::new());
}

/// Assert an invariant and record that it was checked.
///
/// Panics with the invariant text if the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariants::__check($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariants::__check($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __check(condition: bool, message: &'static str, context: Option<&str>) {
    CHECKED.with(|log| {
        log.borrow_mut().insert(message);
    });

    if !condition {
        panic!("INVARIANT VIOLATION [{}]: {}", context.unwrap_or("unknown"), message);
    }
}

/// Panic unless every invariant in `required` was checked on this thread.
pub fn contract_test(name: &str, required: &[&str]) {
    let missing: Vec<&str> = CHECKED.with(|log| {
        let log = log.borrow();
        required.iter().copied().filter(|inv| !log.contains(inv)).collect()
    });

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: invariants never checked:\n  - {}",
            name,
            missing.join("\n  - ")
        );
    }
}

pub fn was_checked(message: &str) -> bool {
    CHECKED.with(|log| log.borrow().contains(message))
}

pub fn clear_invariant_log() {
    CHECKED.with(|log| log.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_invariant_is_logged() {
        clear_invariant_log();
        crate::assert_invariant!(1 + 1 == 2, "arithmetic holds");
        assert!(was_checked("arithmetic holds"));
        contract_test("arithmetic", &["arithmetic holds"]);
    }

    #[test]
    #[should_panic(expected = "CONTRACT FAILURE")]
    fn test_missing_invariant_fails_contract() {
        clear_invariant_log();
        contract_test("nothing", &["never checked"]);
    }

    #[test]
    #[should_panic(expected = "INVARIANT VIOLATION [unit]")]
    fn test_violation_panics() {
        crate::assert_invariant!(false, "always false", "unit");
    }
}
