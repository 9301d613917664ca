use std::time::{Duration, Instant};

use surge_core::prelude::DelegatedShutdownListener;

use crate::executor::Executor;
use crate::ramp::{RampPoint, RampProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RampEnd {
    /// The profile ran to completion.
    Completed,
    /// The run was cancelled before the profile completed.
    Cancelled,
}

/// Drives the virtual user population along a [RampProfile].
pub(crate) struct RampController {
    profile: RampProfile,
    interval: Duration,
}

impl RampController {
    pub(crate) fn new(profile: RampProfile, interval: Duration) -> Self {
        Self { profile, interval }
    }

    /// Recompute the target every interval and hand it to `reconcile`, until the profile completes
    /// or `cancel` fires. The wait between ticks is cut short by cancellation.
    pub(crate) fn run(
        &self,
        executor: &Executor,
        mut cancel: DelegatedShutdownListener,
        mut reconcile: impl FnMut(usize),
    ) -> RampEnd {
        let started = Instant::now();
        let mut current_stage = None;
        let mut last_target = None;

        loop {
            if cancel.should_shutdown() {
                log::info!("Run cancelled after {:.1}s", started.elapsed().as_secs_f64());
                return RampEnd::Cancelled;
            }

            let elapsed = started.elapsed();
            let target = match self.profile.target_at(elapsed) {
                RampPoint::Target(target) => target,
                RampPoint::Complete => {
                    log::info!("Ramp profile complete after {:.1}s", elapsed.as_secs_f64());
                    return RampEnd::Completed;
                }
            };

            let stage = self.profile.stage_index_at(elapsed);
            if stage != current_stage {
                match stage.and_then(|i| self.profile.stages().get(i).map(|s| (i, s))) {
                    Some((index, stage)) => log::info!(
                        "Stage {}: moving to {} virtual users over {}",
                        index + 1,
                        stage.target,
                        humantime::format_duration(stage.duration)
                    ),
                    None => log::info!("Holding {} virtual users", target),
                }
                current_stage = stage;
            }

            if last_target != Some(target) {
                log::debug!("Target is {} virtual users", target);
                last_target = Some(target);
            }
            reconcile(target);

            let interval = self.interval;
            let listener = &mut cancel;
            executor.block_on(async move {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {},
                    _ = listener.wait_for_shutdown() => {},
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramp::{RunBound, Stage};
    use surge_core::prelude::ShutdownHandle;

    fn executor() -> Executor {
        Executor::new(
            tokio::runtime::Runtime::new().unwrap(),
            ShutdownHandle::new(),
        )
    }

    #[test]
    fn follows_a_two_stage_profile() {
        let profile = RampProfile::staged(vec![
            Stage::new(Duration::from_millis(200), 5),
            Stage::new(Duration::from_millis(200), 0),
        ]);
        let controller = RampController::new(profile, Duration::from_millis(10));

        let cancel = ShutdownHandle::new();
        let started = Instant::now();
        let mut samples = Vec::new();
        let end = controller.run(&executor(), cancel.new_listener(), |target| {
            samples.push((started.elapsed(), target))
        });

        assert_eq!(RampEnd::Completed, end);
        assert!(started.elapsed() >= Duration::from_millis(400));
        assert!(samples.iter().all(|(_, target)| *target <= 5));
        assert!(samples.iter().any(|(_, target)| *target == 5));
        let (_, last) = samples.last().unwrap();
        assert!(*last <= 1, "last target was {last}");
    }

    #[test]
    fn cancellation_wakes_the_controller() {
        let profile =
            RampProfile::constant(3, Duration::from_secs(60)).with_bound(RunBound::Unbounded);
        let controller = RampController::new(profile, Duration::from_secs(30));

        let cancel = ShutdownHandle::new();
        let canceller = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.shutdown();
        });

        let started = Instant::now();
        let mut targets = Vec::new();
        let end = controller.run(&executor(), cancel.new_listener(), |target| targets.push(target));

        assert_eq!(RampEnd::Cancelled, end);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(vec![3], targets);
    }
}
