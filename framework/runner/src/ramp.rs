use std::time::Duration;

/// A segment of a ramp profile. Over `duration` the target moves linearly from the previous
/// stage's target to this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// What ends a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunBound {
    /// The run ends when the final stage has elapsed.
    Stages,
    /// The run ends after this long. The final target is held if the stages finish sooner.
    Duration(Duration),
    /// Hold the final target until the run is cancelled.
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampPoint {
    Target(usize),
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampProfile {
    start_vus: usize,
    stages: Vec<Stage>,
    bound: RunBound,
}

impl RampProfile {
    pub fn new(start_vus: usize, stages: Vec<Stage>) -> Self {
        Self {
            start_vus,
            stages,
            bound: RunBound::Stages,
        }
    }

    /// Ramp from zero virtual users through the given stages.
    pub fn staged(stages: Vec<Stage>) -> Self {
        Self::new(0, stages)
    }

    /// Run `vus` virtual users for `duration`, with no ramp.
    pub fn constant(vus: usize, duration: Duration) -> Self {
        Self::new(vus, vec![Stage::new(duration, vus)])
    }

    pub fn with_bound(mut self, bound: RunBound) -> Self {
        self.bound = bound;
        self
    }

    pub fn start_vus(&self) -> usize {
        self.start_vus
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn bound(&self) -> RunBound {
        self.bound
    }

    pub fn stages_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration))
    }

    /// How long the run is expected to last, `None` for a soak run.
    pub fn planned_duration(&self) -> Option<Duration> {
        match self.bound {
            RunBound::Stages => Some(self.stages_duration()),
            RunBound::Duration(duration) => Some(duration),
            RunBound::Unbounded => None,
        }
    }

    pub fn peak_target(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_vus, usize::max)
    }

    /// The index of the stage running at `elapsed`, or `None` once every stage has elapsed.
    pub fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        let mut stage_end = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            stage_end = stage_end.saturating_add(stage.duration);
            if elapsed < stage_end {
                return Some(index);
            }
        }
        None
    }

    /// The number of virtual users that should be running at `elapsed` since the start of the run.
    pub fn target_at(&self, elapsed: Duration) -> RampPoint {
        if let RunBound::Duration(limit) = self.bound {
            if elapsed >= limit {
                return RampPoint::Complete;
            }
        }

        let mut previous = self.start_vus;
        let mut stage_start = Duration::ZERO;
        for stage in &self.stages {
            let stage_end = stage_start.saturating_add(stage.duration);
            if elapsed < stage_end {
                let progress =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                return RampPoint::Target(interpolate(previous, stage.target, progress));
            }

            previous = stage.target;
            stage_start = stage_end;
        }

        match self.bound {
            RunBound::Stages => RampPoint::Complete,
            RunBound::Duration(_) | RunBound::Unbounded => RampPoint::Target(previous),
        }
    }
}

fn interpolate(from: usize, to: usize, progress: f64) -> usize {
    let value = from as f64 + (to as f64 - from as f64) * progress;
    (value.round() as usize).clamp(from.min(to), from.max(to))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn two_stage_profile_at_boundaries() {
        let profile = RampProfile::staged(vec![Stage::new(secs(10), 5), Stage::new(secs(10), 0)]);

        assert_eq!(RampPoint::Target(0), profile.target_at(Duration::ZERO));
        assert_eq!(RampPoint::Target(3), profile.target_at(secs(5)));
        assert_eq!(RampPoint::Target(5), profile.target_at(secs(10)));
        assert_eq!(RampPoint::Target(3), profile.target_at(secs(15)));
        assert_eq!(RampPoint::Target(0), profile.target_at(millis(19_999)));
        assert_eq!(RampPoint::Complete, profile.target_at(secs(20)));
        assert_eq!(Some(secs(20)), profile.planned_duration());
    }

    #[test]
    fn interpolation_never_overshoots() {
        let profiles = [
            RampProfile::staged(vec![Stage::new(secs(7), 13), Stage::new(secs(3), 2)]),
            RampProfile::new(40, vec![Stage::new(secs(1), 1000), Stage::new(secs(11), 0)]),
            RampProfile::staged(vec![
                Stage::new(secs(60), 100),
                Stage::new(secs(60), 300),
                Stage::new(secs(60), 600),
                Stage::new(secs(60), 1000),
                Stage::new(secs(120), 0),
            ]),
        ];

        for profile in profiles {
            let mut stage_start = Duration::ZERO;
            let mut previous = profile.start_vus();
            for stage in profile.stages() {
                let (low, high) = (previous.min(stage.target), previous.max(stage.target));
                for step in 0..100u32 {
                    let t = stage_start + stage.duration * step / 100;
                    let RampPoint::Target(target) = profile.target_at(t) else {
                        panic!("profile completed early at {t:?}");
                    };
                    assert!(
                        (low..=high).contains(&target),
                        "{target} outside {low}..={high} at {t:?}"
                    );
                }
                previous = stage.target;
                stage_start += stage.duration;
            }
        }
    }

    #[test]
    fn ramp_is_monotonic_within_a_stage() {
        let profile = RampProfile::staged(vec![Stage::new(secs(60), 1000)]);

        let mut last = 0;
        for ms in (0..60_000).step_by(250) {
            let RampPoint::Target(target) = profile.target_at(millis(ms)) else {
                panic!("profile completed early");
            };
            assert!(target >= last);
            last = target;
        }
    }

    #[test]
    fn zero_duration_stage_jumps_to_target() {
        let profile =
            RampProfile::staged(vec![Stage::new(Duration::ZERO, 50), Stage::new(secs(10), 50)]);

        assert_eq!(RampPoint::Target(50), profile.target_at(Duration::ZERO));
        assert_eq!(RampPoint::Target(50), profile.target_at(secs(5)));
        assert_eq!(Some(1), profile.stage_index_at(Duration::ZERO));
    }

    #[test]
    fn constant_profile_holds_target() {
        let profile = RampProfile::constant(10, secs(30));

        assert_eq!(RampPoint::Target(10), profile.target_at(Duration::ZERO));
        assert_eq!(RampPoint::Target(10), profile.target_at(secs(29)));
        assert_eq!(RampPoint::Complete, profile.target_at(secs(30)));
        assert_eq!(10, profile.peak_target());
    }

    #[test]
    fn duration_bound_holds_or_cuts_the_profile() {
        let stages = vec![Stage::new(secs(10), 10)];

        let held = RampProfile::staged(stages.clone()).with_bound(RunBound::Duration(secs(20)));
        assert_eq!(RampPoint::Target(10), held.target_at(secs(15)));
        assert_eq!(RampPoint::Complete, held.target_at(secs(20)));

        let cut = RampProfile::staged(stages).with_bound(RunBound::Duration(secs(4)));
        assert_eq!(RampPoint::Target(3), cut.target_at(secs(3)));
        assert_eq!(RampPoint::Complete, cut.target_at(secs(4)));
    }

    #[test]
    fn unbounded_profile_never_completes() {
        let profile = RampProfile::staged(vec![Stage::new(secs(10), 8), Stage::new(secs(10), 4)])
            .with_bound(RunBound::Unbounded);

        assert_eq!(RampPoint::Target(4), profile.target_at(secs(3600)));
        assert_eq!(None, profile.planned_duration());
    }

    #[test]
    fn empty_profile_completes_immediately() {
        assert_eq!(
            RampPoint::Complete,
            RampProfile::staged(vec![]).target_at(Duration::ZERO)
        );
    }

    #[test]
    fn huge_stage_durations_saturate() {
        let profile = RampProfile::staged(vec![
            Stage::new(Duration::MAX, 10),
            Stage::new(Duration::MAX, 0),
        ]);

        assert_eq!(Duration::MAX, profile.stages_duration());
        assert_eq!(Some(Duration::MAX), profile.planned_duration());
        assert_eq!(Some(0), profile.stage_index_at(secs(3600)));
        assert_eq!(RampPoint::Target(0), profile.target_at(secs(3600)));
    }
}
