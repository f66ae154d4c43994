//! Profile scheduling
//!
//! Expands a requested test mode into the ordered run plans for one
//! subsystem. Expansion is a pure data transformation: nothing is spawned
//! and nothing is logged here.

use crate::error::ConfigurationError;
use crate::models::{Profile, RunPlan, SubsystemKind, TestMode};
use std::time::Duration;

/// Fixed length of a spike burst, independent of the configured duration
pub const SPIKE_DURATION: Duration = Duration::from_secs(30);

/// What the scheduler needs to know about one subsystem run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanRequest {
    pub subsystem: SubsystemKind,
    pub mode: TestMode,
    /// Worker count the subsystem sustains at full load
    pub natural_concurrency: usize,
    /// Duration of sustained profiles
    pub duration: Duration,
    pub intensity: Option<u8>,
}

/// Maps test modes to run plans
#[derive(Debug, Clone)]
pub struct ProfileScheduler {
    spike_duration: Duration,
}

impl Default for ProfileScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileScheduler {
    pub fn new() -> Self {
        Self {
            spike_duration: SPIKE_DURATION,
        }
    }

    /// Override the spike burst length
    pub fn with_spike_duration(mut self, duration: Duration) -> Self {
        self.spike_duration = duration;
        self
    }

    pub fn spike_duration(&self) -> Duration {
        self.spike_duration
    }

    /// Expand a request into plans, in execution order
    ///
    /// Worker policy for natural concurrency N:
    /// - Baseline: 0 workers, full duration
    /// - Load: N/2 workers (rounded down), full duration
    /// - Stress: N workers, full duration
    /// - Spike: N workers, fixed spike duration
    pub fn expand(&self, request: &PlanRequest) -> Result<Vec<RunPlan>, ConfigurationError> {
        if request.duration.is_zero() {
            return Err(ConfigurationError::ZeroDuration);
        }
        if let Some(intensity) = request.intensity {
            if intensity > 100 {
                return Err(ConfigurationError::IntensityOutOfRange(intensity));
            }
        }

        let n = request.natural_concurrency;
        let plans = request
            .mode
            .profiles()
            .iter()
            .map(|&profile| {
                let (workers, duration) = match profile {
                    Profile::Baseline => (0, request.duration),
                    Profile::Load => (n / 2, request.duration),
                    Profile::Stress => (n, request.duration),
                    Profile::Spike => (n, self.spike_duration),
                };
                RunPlan::new(
                    request.subsystem,
                    profile,
                    workers,
                    duration,
                    request.intensity,
                )
            })
            .collect();

        Ok(plans)
    }
}

/// Total wall time of a sequence of plans
pub fn estimate(plans: &[RunPlan]) -> Duration {
    plans.iter().map(RunPlan::duration).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mode: TestMode, n: usize) -> PlanRequest {
        PlanRequest {
            subsystem: SubsystemKind::Cpu,
            mode,
            natural_concurrency: n,
            duration: Duration::from_secs(20),
            intensity: None,
        }
    }

    #[test]
    fn test_all_mode_expansion() {
        let plans = ProfileScheduler::new()
            .expand(&request(TestMode::All, 4))
            .unwrap();

        let shape: Vec<(Profile, usize, u64)> = plans
            .iter()
            .map(|p| (p.profile(), p.workers(), p.duration().as_secs()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (Profile::Baseline, 0, 20),
                (Profile::Load, 2, 20),
                (Profile::Stress, 4, 20),
                (Profile::Spike, 4, 30),
            ]
        );
        assert!(plans.iter().all(|p| p.subsystem() == SubsystemKind::Cpu));
        assert_eq!(estimate(&plans), Duration::from_secs(90));
    }

    #[test]
    fn test_single_profile_modes() {
        let scheduler = ProfileScheduler::new();

        let load = scheduler.expand(&request(TestMode::Load, 1)).unwrap();
        assert_eq!(load.len(), 1);
        assert_eq!(load[0].workers(), 0);

        let spike = scheduler.expand(&request(TestMode::Spike, 3)).unwrap();
        assert_eq!(spike[0].workers(), 3);
        assert_eq!(spike[0].duration(), SPIKE_DURATION);

        let load = scheduler.expand(&request(TestMode::Load, 7)).unwrap();
        assert_eq!(load[0].workers(), 3);
    }

    #[test]
    fn test_spike_duration_ignores_configured_duration() {
        let mut req = request(TestMode::Spike, 2);
        req.duration = Duration::from_secs(600);
        let plans = ProfileScheduler::new().expand(&req).unwrap();
        assert_eq!(plans[0].duration(), Duration::from_secs(30));

        let plans = ProfileScheduler::new()
            .with_spike_duration(Duration::from_secs(2))
            .expand(&req)
            .unwrap();
        assert_eq!(plans[0].duration(), Duration::from_secs(2));
    }

    #[test]
    fn test_intensity_carried_and_validated() {
        let mut req = request(TestMode::All, 2);
        req.intensity = Some(40);
        let plans = ProfileScheduler::new().expand(&req).unwrap();
        assert!(plans.iter().all(|p| p.intensity() == Some(40)));

        req.intensity = Some(150);
        assert_eq!(
            ProfileScheduler::new().expand(&req),
            Err(ConfigurationError::IntensityOutOfRange(150))
        );
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut req = request(TestMode::Stress, 2);
        req.duration = Duration::ZERO;
        assert_eq!(
            ProfileScheduler::new().expand(&req),
            Err(ConfigurationError::ZeroDuration)
        );
    }
}
