//! Wall-clock telemetry for the pipeline and its external-service calls.
//!
//! Purely observational: nothing in the pipeline reads these values back.

use std::time::Duration;

use serde::Serialize;

/// Accumulated timing for one pipeline stage.
#[derive(Debug, Clone, Default)]
pub struct StageTiming {
    last: Duration,
    total: Duration,
    count: u64,
}

impl StageTiming {
    pub fn record(&mut self, elapsed: Duration) {
        self.last = elapsed;
        self.total += elapsed;
        self.count += 1;
    }

    pub fn last(&self) -> Duration {
        self.last
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

/// Per-stage timings for the whole wrapper.
#[derive(Debug, Clone, Default)]
pub struct PipelineTiming {
    pub segmentation: StageTiming,
    pub inpainting: StageTiming,
    pub compositing: StageTiming,
    /// Whole `reset`/`step` pipeline including service calls.
    pub pipeline: StageTiming,
}

impl PipelineTiming {
    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot {
            segmentation: StageSnapshot::from(&self.segmentation),
            inpainting: StageSnapshot::from(&self.inpainting),
            compositing: StageSnapshot::from(&self.compositing),
            pipeline: StageSnapshot::from(&self.pipeline),
        }
    }
}

/// Serializable view of one stage's timing.
#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    pub last_ms: f64,
    pub total_ms: f64,
    pub mean_ms: f64,
    pub count: u64,
}

impl From<&StageTiming> for StageSnapshot {
    fn from(t: &StageTiming) -> Self {
        Self {
            last_ms: t.last().as_secs_f64() * 1e3,
            total_ms: t.total().as_secs_f64() * 1e3,
            mean_ms: t.mean().as_secs_f64() * 1e3,
            count: t.count(),
        }
    }
}

/// Serializable view of all stage timings, queryable after each step.
#[derive(Debug, Clone, Serialize)]
pub struct TimingSnapshot {
    pub segmentation: StageSnapshot,
    pub inpainting: StageSnapshot,
    pub compositing: StageSnapshot,
    pub pipeline: StageSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_over_recorded_samples() {
        let mut t = StageTiming::default();
        t.record(Duration::from_millis(10));
        t.record(Duration::from_millis(30));
        assert_eq!(t.count(), 2);
        assert_eq!(t.last(), Duration::from_millis(30));
        assert_eq!(t.mean(), Duration::from_millis(20));
    }

    #[test]
    fn empty_stage_reports_zero_mean() {
        let t = StageTiming::default();
        assert_eq!(t.mean(), Duration::ZERO);
    }
}
