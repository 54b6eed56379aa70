//! Training configuration and metrics

/// Training configuration
#[derive(Clone, Debug)]
pub struct TrainConfig {
    /// Number of passes over the batches in [`fit`](super::QatTrainer::fit)
    pub epochs: usize,

    /// Clamp every quantized layer into its grid support after each optimizer step
    pub clamp_after_step: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            clamp_after_step: true,
        }
    }
}

impl TrainConfig {
    /// Create a new training configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_clamp_after_step(mut self, clamp: bool) -> Self {
        self.clamp_after_step = clamp;
        self
    }
}

/// Tracks training metrics across epochs
#[derive(Clone, Debug, Default)]
pub struct MetricsTracker {
    /// Training loss history (one per epoch)
    pub losses: Vec<f32>,

    /// Learning rates (one per epoch)
    pub learning_rates: Vec<f32>,

    /// Alpha in effect during each epoch
    pub alphas: Vec<f32>,

    /// Beta in effect during each epoch
    pub betas: Vec<f32>,

    /// Training step count
    pub steps: usize,

    /// Current epoch
    pub epoch: usize,
}

impl MetricsTracker {
    /// Create a new metrics tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an epoch's training metrics
    pub fn record_epoch(&mut self, loss: f32, lr: f32, alpha: f32, beta: f32) {
        self.losses.push(loss);
        self.learning_rates.push(lr);
        self.alphas.push(alpha);
        self.betas.push(beta);
        self.epoch += 1;
    }

    /// Increment step counter
    pub fn increment_step(&mut self) {
        self.steps += 1;
    }

    /// Get average loss over last N epochs
    pub fn avg_loss(&self, n: usize) -> f32 {
        if self.losses.is_empty() {
            return 0.0;
        }

        let start = self.losses.len().saturating_sub(n);
        let window = &self.losses[start..];
        window.iter().sum::<f32>() / window.len() as f32
    }

    /// Get best (minimum) loss
    pub fn best_loss(&self) -> Option<f32> {
        self.losses.iter().copied().min_by(f32::total_cmp)
    }
}
