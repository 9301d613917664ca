use std::future::Future;

use surge_core::prelude::{ShutdownHandle, ShutdownSignalError};

#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
    abort_handle: ShutdownHandle,
}

impl Executor {
    pub(crate) fn new(runtime: tokio::runtime::Runtime, abort_handle: ShutdownHandle) -> Self {
        Self {
            runtime,
            abort_handle,
        }
    }

    /// Run async code in place, blocking until it completes.
    ///
    /// Note that the future will be cancelled if the run is aborted, which happens when iterations
    /// are still in flight at the end of the graceful stop period. The call then returns a
    /// [ShutdownSignalError], which you can propagate with `?` so that the iteration is recorded as
    /// interrupted. Submitting a future which does not support cancelling may prevent the runner
    /// from shutting down.
    pub fn execute_in_place<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let mut abort_listener = self.abort_handle.new_listener();
        self.runtime.block_on(async move {
            tokio::select! {
                result = fut => result,
                _ = abort_listener.wait_for_shutdown() => {
                    Err(anyhow::anyhow!(ShutdownSignalError::default()))
                },
            }
        })
    }

    /// Submit async code to be run in the background.
    ///
    /// Note that the future will not be cancelled if the run is aborted. It is also not guaranteed
    /// that the runner will wait for the future to complete before shutting down.
    ///
    /// In an `iterate` hook, you should use [Executor::execute_in_place] instead of
    /// [Executor::spawn] so that your future completes before the iteration is measured.
    pub fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        self.runtime.spawn(fut);
    }

    /// Drive a future to completion on the runtime without listening for the abort signal.
    pub(crate) fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn executor() -> (Executor, ShutdownHandle) {
        let abort = ShutdownHandle::new();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        (Executor::new(runtime, abort.clone()), abort)
    }

    #[test]
    fn execute_in_place_returns_the_result() {
        let (executor, _abort) = executor();

        let value = executor.execute_in_place(async { Ok(42) }).unwrap();

        assert_eq!(42, value);
    }

    #[test]
    fn abort_cancels_work_in_progress() {
        let (executor, abort) = executor();

        let aborter = abort.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            aborter.shutdown();
        });

        let err = executor
            .execute_in_place(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .unwrap_err();

        assert!(err.is::<ShutdownSignalError>());
    }
}
