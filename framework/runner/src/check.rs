use surge_instruments::{run_check, Check};

use crate::context::{RunnerContext, UserValuesConstraint, VirtualUserContext};

impl<RV: UserValuesConstraint> RunnerContext<RV> {
    /// Evaluate a named check from `setup` or `teardown`.
    ///
    /// The result goes straight to the run's check totals, it is not part of any iteration. Checks
    /// made once the run has been finalized, in `teardown`, are logged and dropped.
    pub fn check<T, F>(&self, name: &str, target: &T, predicate: F) -> bool
    where
        T: ?Sized,
        F: FnOnce(&T) -> anyhow::Result<bool>,
    {
        let result = run_check(name, target, predicate);
        let passed = result.passed;
        if !self.aggregator.record_checks([result]) {
            log::warn!("Check [{}] was made after the run was finalized", name);
        }
        passed
    }

    pub fn check_with<T, C>(&self, check: &C, target: &T) -> bool
    where
        T: ?Sized,
        C: Check<T> + ?Sized,
    {
        self.check(check.name(), target, |t| check.evaluate(t))
    }
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> VirtualUserContext<RV, V> {
    /// Evaluate a named check against `target` and add the result to the current iteration.
    ///
    /// Returns whether the check passed. A predicate that errors or panics counts as a failed check.
    /// A failed check does not fail the iteration, return an error from `iterate` if it should.
    pub fn check<T, F>(&mut self, name: &str, target: &T, predicate: F) -> bool
    where
        T: ?Sized,
        F: FnOnce(&T) -> anyhow::Result<bool>,
    {
        let result = run_check(name, target, predicate);
        let passed = result.passed;
        self.checks.push(result);
        passed
    }

    /// Evaluate a reusable [Check] against `target`.
    pub fn check_with<T, C>(&mut self, check: &C, target: &T) -> bool
    where
        T: ?Sized,
        C: Check<T> + ?Sized,
    {
        self.check(check.name(), target, |t| check.evaluate(t))
    }

    /// Evaluate several checks against the same target. Returns true if all of them passed.
    pub fn check_all<T>(&mut self, checks: &[&dyn Check<T>], target: &T) -> bool
    where
        T: ?Sized,
    {
        checks
            .iter()
            .map(|check| self.check_with(*check, target))
            .fold(true, |all, passed| all && passed)
    }
}

#[cfg(test)]
mod tests {
    use crate::context::{RunnerContext, VirtualUserContext};
    use crate::executor::Executor;
    use crate::scheduler::SchedulerStats;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use surge_core::prelude::ShutdownHandle;
    use surge_instruments::{Check, CheckResult, MetricsAggregator, PassFail};

    struct Even;

    impl Check<u32> for Even {
        fn name(&self) -> &str {
            "is even"
        }

        fn evaluate(&self, target: &u32) -> anyhow::Result<bool> {
            Ok(target % 2 == 0)
        }
    }

    struct Small;

    impl Check<u32> for Small {
        fn name(&self) -> &str {
            "is small"
        }

        fn evaluate(&self, target: &u32) -> anyhow::Result<bool> {
            Ok(*target < 10)
        }
    }

    fn runner_context(aggregator: Arc<MetricsAggregator>) -> RunnerContext<()> {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let executor = Arc::new(Executor::new(runtime, ShutdownHandle::new()));
        RunnerContext::new(
            executor,
            ShutdownHandle::new(),
            Arc::new(SchedulerStats::default()),
            aggregator,
            None,
            "test".to_string(),
        )
    }

    fn vu_context() -> VirtualUserContext<(), ()> {
        let runner_context = Arc::new(runner_context(Arc::new(MetricsAggregator::new())));
        VirtualUserContext::new(1, runner_context, ShutdownHandle::new().new_listener())
    }

    #[test]
    fn checks_are_collected_for_the_iteration() {
        let mut ctx = vu_context();

        assert!(ctx.check("positive", &5, |v| Ok(*v > 0)));
        assert!(!ctx.check("broken", &5, |_| anyhow::bail!("cannot evaluate")));
        assert!(!ctx.check_all(&[&Even, &Small], &12u32));

        assert_eq!(
            vec![
                CheckResult::new("positive", true),
                CheckResult::new("broken", false),
                CheckResult::new("is even", true),
                CheckResult::new("is small", false),
            ],
            ctx.checks
        );
    }

    #[test]
    fn new_iteration_clears_checks() {
        let mut ctx = vu_context();
        ctx.check("first", &(), |_| Ok(true));

        ctx.begin_iteration();

        assert!(ctx.checks.is_empty());
        assert_eq!(1, ctx.iteration());
    }

    #[test]
    fn setup_checks_go_to_the_run_totals() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let ctx = runner_context(aggregator.clone());

        assert!(!ctx.check_with(&Even, &7u32));
        assert!(ctx.check("reachable", &(), |_| Ok(true)));

        let snapshot = aggregator.finalize();
        assert_eq!(
            PassFail {
                passes: 0,
                fails: 1,
            },
            snapshot.checks["is even"]
        );
        assert_eq!(1, snapshot.checks["reachable"].passes);
        assert_eq!(0, snapshot.iterations.completed);

        assert!(ctx.check("after the run", &(), |_| Ok(true)));
        assert!(!aggregator.snapshot().checks.contains_key("after the run"));
    }
}
