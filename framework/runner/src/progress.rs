use std::cmp::min;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use surge_core::prelude::DelegatedShutdownListener;
use surge_instruments::MetricsAggregator;

use crate::scheduler::SchedulerStats;

/// Displays a progress bar while the run is ramping, showing how long is left along with the
/// current virtual user count and iteration totals.
pub(crate) fn start_progress(
    planned_runtime: Duration,
    stats: Arc<SchedulerStats>,
    aggregator: Arc<MetricsAggregator>,
    shutdown_listener: DelegatedShutdownListener,
) {
    let spawned = std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let style = match ProgressStyle::with_template(
                "{spinner:.green} [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned_runtime}] {msg}",
            ) {
                Ok(style) => style,
                Err(e) => {
                    log::warn!("Failed to set up the progress bar: {}", e);
                    return;
                }
            };

            let start_time = Instant::now();
            let pb = ProgressBar::new(planned_runtime.as_secs());
            pb.set_style(
                style
                    .with_key("planned_runtime", {
                        let hours = planned_runtime.as_secs() / 3600;
                        let minutes = (planned_runtime.as_secs() % 3600) / 60;
                        let seconds = planned_runtime.as_secs() % 60;
                        move |_state: &ProgressState, w: &mut dyn Write| {
                            let _ = write!(w, "{:02}:{:02}:{:02}", hours, minutes, seconds);
                        }
                    })
                    .progress_chars("#>-"),
            );

            loop {
                if shutdown_listener.should_shutdown() {
                    log::trace!("Progress thread shutting down");
                    pb.finish_and_clear();
                    break;
                }

                let iterations = aggregator.iteration_counts();
                pb.set_message(format!(
                    "vus: {}, iterations: {} ({} failed)",
                    stats.live(),
                    iterations.completed,
                    iterations.failed
                ));
                pb.set_position(min(
                    start_time.elapsed().as_secs(),
                    planned_runtime.as_secs(),
                ));
                std::thread::sleep(Duration::from_millis(500));
            }
        });

    if let Err(e) = spawned {
        log::warn!("Failed to start progress thread: {}", e);
    }
}
