//! Value schedules for learning rates and elastic coefficients
//!
//! A schedule yields one value per step. The trainer steps the learning-rate
//! schedule and the alpha/beta schedules once per epoch, so annealing from
//! soft to hard quantization is the same machinery as learning-rate decay.

use super::Optimizer;
use std::f32::consts::PI;

/// A value that evolves with a step counter
pub trait Schedule {
    /// Current value
    fn value(&self) -> f32;

    /// Advance by one step
    fn step(&mut self);

    /// Set the optimizer's learning rate to the current value
    fn apply<O: Optimizer + ?Sized>(&self, optimizer: &mut O)
    where
        Self: Sized,
    {
        optimizer.set_lr(self.value());
    }
}

/// Always the same value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant {
    value: f32,
}

impl Constant {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl Schedule for Constant {
    fn value(&self) -> f32 {
        self.value
    }

    fn step(&mut self) {}
}

/// Straight line from `start` to `end` over `steps`, then holds `end`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearAnnealing {
    start: f32,
    end: f32,
    steps: usize,
    current_step: usize,
}

impl LinearAnnealing {
    pub fn new(start: f32, end: f32, steps: usize) -> Self {
        Self {
            start,
            end,
            steps,
            current_step: 0,
        }
    }
}

impl Schedule for LinearAnnealing {
    fn value(&self) -> f32 {
        if self.current_step >= self.steps {
            return self.end;
        }
        let progress = self.current_step as f32 / self.steps as f32;
        self.start + (self.end - self.start) * progress
    }

    fn step(&mut self) {
        self.current_step += 1;
    }
}

/// Cosine annealing
///
/// Formula: v_t = end + 0.5 * (start - end) * (1 + cos(π * t / T))
///
/// Where:
/// - t is the current step
/// - T is the total number of steps
///
/// `start` may be below `end`, which ramps a coefficient up instead of down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CosineAnnealing {
    start: f32,
    end: f32,
    steps: usize,
    current_step: usize,
}

impl CosineAnnealing {
    /// Create a new cosine schedule
    ///
    /// # Arguments
    /// * `start` - Value at step 0
    /// * `steps` - Total number of steps for the schedule
    /// * `end` - Value from step `steps` on
    pub fn new(start: f32, steps: usize, end: f32) -> Self {
        Self {
            start,
            end,
            steps,
            current_step: 0,
        }
    }

    /// Create a schedule that decays to zero
    pub fn to_zero(start: f32, steps: usize) -> Self {
        Self::new(start, steps, 0.0)
    }
}

impl Schedule for CosineAnnealing {
    fn value(&self) -> f32 {
        if self.current_step >= self.steps {
            return self.end;
        }

        let progress = self.current_step as f32 / self.steps as f32;
        let cosine_decay = 0.5 * (1.0 + (PI * progress).cos());
        self.end + (self.start - self.end) * cosine_decay
    }

    fn step(&mut self) {
        self.current_step += 1;
    }
}
