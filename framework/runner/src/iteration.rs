use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use surge_core::prelude::{ShutdownSignalError, VuBailError};
use surge_instruments::IterationOutcome;

use crate::context::VirtualUserContext;
use crate::definition::{HookResult, Scenario};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IterationEnd {
    Continue,
    Bail,
}

/// Run one iteration of the scenario for one virtual user.
///
/// Errors and panics are contained here, the worker always gets an outcome back.
pub(crate) fn run_once<S: Scenario>(
    scenario: &S,
    ctx: &mut VirtualUserContext<S::RunnerValue, S::UserValue>,
) -> (IterationOutcome, IterationEnd) {
    ctx.begin_iteration();

    let started = Instant::now();
    let result = catch_hook(|| scenario.iterate(ctx));
    let duration = started.elapsed();

    let mut end = IterationEnd::Continue;
    let mut outcome = IterationOutcome::succeeded(duration);
    if let Err(e) = result {
        if caused_by::<ShutdownSignalError>(&e) {
            log::debug!("Iteration {} of vu-{} was interrupted", ctx.iteration(), ctx.vu_id());
            outcome.interrupted = true;
        } else if caused_by::<VuBailError>(&e) {
            log::warn!("vu-{} is bailing: {:?}", ctx.vu_id(), e);
            outcome.failed = true;
            end = IterationEnd::Bail;
        } else {
            log::warn!(
                "Iteration {} of vu-{} failed: {:?}",
                ctx.iteration(),
                ctx.vu_id(),
                e
            );
            outcome.failed = true;
        }
    }

    let outcome = outcome
        .with_checks(std::mem::take(&mut ctx.checks))
        .with_operations(ctx.recorder().take());

    (outcome, end)
}

/// Call a scenario hook, turning a panic into an error.
pub(crate) fn catch_hook(hook: impl FnOnce() -> HookResult) -> HookResult {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("Hook panicked: {}", panic_message(&*panic))),
    }
}

fn caused_by<E: std::error::Error + Send + Sync + 'static>(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| cause.is::<E>())
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
