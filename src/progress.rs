//! Progress reporting sinks for long-running fits.
//!
//! The estimator drives an injected [`ProgressReporter`]; the reporter never
//! influences the computation.

/// Passive sink for progress notifications.
pub trait ProgressReporter {
    /// Start a new phase.
    fn reset(&mut self);
    /// Upper bound on the number of steps in the current phase.
    fn set_max_steps(&mut self, steps: usize);
    /// One step of the current phase has finished.
    fn step(&mut self, label: &str);
}

/// Reporter that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn reset(&mut self) {}
    fn set_max_steps(&mut self, _steps: usize) {}
    fn step(&mut self, _label: &str) {}
}

/// Reporter that forwards progress to the `log` facade.
#[derive(Debug, Clone, Default)]
pub struct LogProgress {
    max_steps: usize,
    current: usize,
    /// Emit one record every `every` steps (0 or 1 logs every step)
    pub every: usize,
}

impl LogProgress {
    /// Log every `every`-th step.
    pub fn new(every: usize) -> Self {
        Self {
            every,
            ..Self::default()
        }
    }

    /// Steps seen since the last reset.
    pub fn current(&self) -> usize {
        self.current
    }
}

impl ProgressReporter for LogProgress {
    fn reset(&mut self) {
        self.current = 0;
        self.max_steps = 0;
    }

    fn set_max_steps(&mut self, steps: usize) {
        self.max_steps = steps;
    }

    fn step(&mut self, label: &str) {
        self.current += 1;
        if self.every <= 1 || self.current % self.every == 0 {
            log::info!("{} ({}/{})", label, self.current, self.max_steps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_progress_counts_steps() {
        let mut progress = LogProgress::new(10);
        progress.set_max_steps(3);
        progress.step("iterations");
        progress.step("iterations");
        assert_eq!(progress.current(), 2);

        progress.reset();
        assert_eq!(progress.current(), 0);
    }
}
