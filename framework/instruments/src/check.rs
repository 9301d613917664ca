use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;

/// The result of evaluating one named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
}

impl CheckResult {
    pub fn new(name: impl Into<String>, passed: bool) -> Self {
        Self {
            name: name.into(),
            passed,
        }
    }
}

/// A reusable, named assertion over a value produced by a transport, typically a response.
pub trait Check<T: ?Sized> {
    fn name(&self) -> &str;

    fn evaluate(&self, target: &T) -> anyhow::Result<bool>;
}

/// Evaluate a predicate as a named check.
///
/// This never fails. A predicate that returns an error or panics is recorded as a failed check
/// with the same name.
pub fn run_check<T, F>(name: &str, target: &T, predicate: F) -> CheckResult
where
    T: ?Sized,
    F: FnOnce(&T) -> anyhow::Result<bool>,
{
    let passed = match catch_unwind(AssertUnwindSafe(|| predicate(target))) {
        Ok(Ok(passed)) => passed,
        Ok(Err(e)) => {
            log::debug!("Check [{}] could not be evaluated: {:?}", name, e);
            false
        }
        Err(_) => {
            log::debug!("Check [{}] panicked while being evaluated", name);
            false
        }
    };

    CheckResult::new(name, passed)
}
