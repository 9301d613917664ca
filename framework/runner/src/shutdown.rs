use surge_core::prelude::ShutdownHandle;
use tokio::signal;

/// The two run wide signals.
///
/// `cancel` asks the run to stop ramping and drain gracefully. `abort` cancels in-flight work in
/// the [crate::executor::Executor] once the graceful stop period is over.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunSignals {
    pub cancel: ShutdownHandle,
    pub abort: ShutdownHandle,
}

/// Listen for Ctrl-C. The first press cancels the run, a second press aborts it.
pub(crate) fn start_shutdown_listener(runtime: &tokio::runtime::Runtime) -> RunSignals {
    let signals = RunSignals::default();

    let listener_signals = signals.clone();
    runtime.spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            log::error!(
                "Failed to listen for Ctrl-C, the run can only be stopped by its profile: {}",
                e
            );
            return;
        }
        listener_signals.cancel.shutdown();
        println!("Received shutdown signal, draining virtual users. Press Ctrl-C again to abort...");

        if signal::ctrl_c().await.is_ok() {
            listener_signals.abort.shutdown();
            println!("Aborting in-flight iterations...");
        }
    });

    signals
}
