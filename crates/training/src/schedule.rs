//! Learning-rate schedules stepped once per applied optimizer boundary.

pub trait LrSchedule: Send {
    fn current(&self) -> f64;

    fn step(&mut self);

    /// Boundaries applied so far (used when resuming).
    fn steps(&self) -> usize;

    fn fast_forward(&mut self, steps: usize) {
        for _ in 0..steps {
            self.step();
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConstantLr(pub f64);

impl LrSchedule for ConstantLr {
    fn current(&self) -> f64 {
        self.0
    }

    fn step(&mut self) {}

    fn steps(&self) -> usize {
        0
    }
}

/// Multiply the rate by `gamma` every `step_size` steps.
#[derive(Debug, Clone, Copy)]
pub struct StepDecay {
    pub base: f64,
    pub step_size: usize,
    pub gamma: f64,
    steps: usize,
}

impl StepDecay {
    pub fn new(base: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            base,
            step_size: step_size.max(1),
            gamma,
            steps: 0,
        }
    }
}

impl LrSchedule for StepDecay {
    fn current(&self) -> f64 {
        self.base * self.gamma.powi((self.steps / self.step_size) as i32)
    }

    fn step(&mut self) {
        self.steps += 1;
    }

    fn steps(&self) -> usize {
        self.steps
    }

    fn fast_forward(&mut self, steps: usize) {
        self.steps += steps;
    }
}
