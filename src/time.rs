//! Step timing.
//!
//! A flock measures each step with a [`Stopwatch`] and hands the result to an
//! optional [`StepHook`]. The driver binary folds the results into a
//! [`TimingSummary`].
//!
//! # Example
//!
//! ```ignore
//! use boidgrid::prelude::*;
//!
//! let mut flock = Flock::initialize(FlockConfig::default())?;
//! flock.set_step_hook(Box::new(|t: &StepTiming| {
//!     println!("step {} ({}): {:?}", t.step, t.search.name(), t.total);
//! }));
//! flock.step_coherent_grid(1.0)?;
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use crate::flock::NeighborSearch;

/// Pipeline stage, for per-stage timings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    AssignCells,
    Sort,
    LocateBounds,
    Gather,
    Aggregate,
    Integrate,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::AssignCells => "assign_cells",
            Stage::Sort => "sort",
            Stage::LocateBounds => "locate_bounds",
            Stage::Gather => "gather",
            Stage::Aggregate => "aggregate",
            Stage::Integrate => "integrate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Timing of one completed step.
#[derive(Clone, Debug)]
pub struct StepTiming {
    /// Zero-based index of the step.
    pub step: u64,
    /// Strategy the step ran with.
    pub search: NeighborSearch,
    /// Wall time of the whole step.
    pub total: Duration,
    /// Per-stage wall time, in execution order. Empty on the GPU backend,
    /// where stages only finish together.
    pub stages: Vec<(Stage, Duration)>,
}

impl StepTiming {
    /// Time spent in `stage`, if it ran.
    pub fn stage(&self, stage: Stage) -> Option<Duration> {
        self.stages
            .iter()
            .find_map(|&(s, d)| (s == stage).then_some(d))
    }
}

/// Callback invoked after every successful step.
pub type StepHook = Box<dyn FnMut(&StepTiming) + Send>;

/// Measures a step stage by stage.
#[derive(Debug)]
pub(crate) struct Stopwatch {
    start: Instant,
    lap_start: Instant,
    stages: Vec<(Stage, Duration)>,
}

impl Stopwatch {
    pub(crate) fn start() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            lap_start: now,
            stages: Vec::with_capacity(6),
        }
    }

    /// Close the running lap and attribute it to `stage`.
    pub(crate) fn lap(&mut self, stage: Stage) {
        let now = Instant::now();
        self.stages.push((stage, now.duration_since(self.lap_start)));
        self.lap_start = now;
    }

    pub(crate) fn finish(self, step: u64, search: NeighborSearch) -> StepTiming {
        StepTiming {
            step,
            search,
            total: self.start.elapsed(),
            stages: self.stages,
        }
    }
}

/// Running aggregate of step timings.
#[derive(Clone, Debug, Default)]
pub struct TimingSummary {
    steps: u64,
    total: Duration,
    min: Option<Duration>,
    max: Duration,
}

impl TimingSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, timing: &StepTiming) {
        self.steps += 1;
        self.total += timing.total;
        self.min = Some(self.min.map_or(timing.total, |m| m.min(timing.total)));
        self.max = self.max.max(timing.total);
    }

    #[inline]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    #[inline]
    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn mean(&self) -> Duration {
        if self.steps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(self.total.as_secs_f64() / self.steps as f64)
        }
    }

    pub fn min(&self) -> Duration {
        self.min.unwrap_or_default()
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Steps per second of wall time spent stepping.
    pub fn steps_per_second(&self) -> f64 {
        let secs = self.total.as_secs_f64();
        if secs > 0.0 {
            self.steps as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for TimingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps, mean {:.3?}, min {:.3?}, max {:.3?} ({:.1} steps/s)",
            self.steps, self.mean(), self.min(), self.max(), self.steps_per_second()
        )
    }
}
