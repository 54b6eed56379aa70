//! Quantization-aware training loop

use super::{Batch, LossFn, MSELoss, MetricsTracker, TrainConfig};
use crate::autograd::backward;
use crate::error::{Error, Result};
use crate::nn::{clamp_model, elastic_layers, set_model_alpha, set_model_beta, Layer, Mode, Module};
use crate::optim::{Optimizer, Schedule};
use std::time::Instant;
use tracing::{debug, info};

/// Result of a training run
#[derive(Debug, Clone)]
pub struct TrainResult {
    /// Number of epochs run
    pub final_epoch: usize,
    /// Mean training loss of the last epoch
    pub final_loss: f32,
    /// Best epoch loss achieved
    pub best_loss: f32,
    /// Total training time in seconds
    pub elapsed_secs: f64,
}

/// Trainer that owns a model and anneals its elastic coefficients
///
/// Each step runs the model in [`Mode::Train`], back-propagates the loss
/// through the quantization operators and updates the raw weights. After
/// each epoch the learning-rate, alpha and beta schedules advance one step
/// and the new coefficients are broadcast to every quantized layer.
///
/// # Example
///
/// ```no_run
/// use elastiq::nn::{Layer, LinearQuantLin};
/// use elastiq::optim::{Adam, LinearAnnealing};
/// use elastiq::train::{Batch, QatTrainer, TrainConfig};
/// use elastiq::Tensor;
///
/// let layer = LinearQuantLin::linear(2, 1, true, -1.0, 1.0, 17).unwrap();
/// let mut trainer = QatTrainer::new(
///     Layer::from(layer),
///     Box::new(Adam::default_params(0.01)),
///     TrainConfig::default(),
/// )
/// .with_alpha_schedule(Box::new(LinearAnnealing::new(1.0, 0.0, 10)));
///
/// let batch = Batch::new(
///     Tensor::from_shape_vec(&[1, 2], vec![1.0, 2.0], false).unwrap(),
///     Tensor::from_shape_vec(&[1, 1], vec![0.5], false).unwrap(),
/// );
/// let result = trainer.fit(&[batch]).unwrap();
/// println!("final loss {}", result.final_loss);
/// ```
pub struct QatTrainer {
    model: Layer,
    optimizer: Box<dyn Optimizer>,
    loss_fn: Box<dyn LossFn>,
    config: TrainConfig,
    lr_schedule: Option<Box<dyn Schedule>>,
    alpha_schedule: Option<Box<dyn Schedule>>,
    beta_schedule: Option<Box<dyn Schedule>>,

    /// Metrics tracker
    pub metrics: MetricsTracker,
}

impl QatTrainer {
    /// Create a trainer using mean squared error
    pub fn new(model: Layer, optimizer: Box<dyn Optimizer>, config: TrainConfig) -> Self {
        Self {
            model,
            optimizer,
            loss_fn: Box::new(MSELoss),
            config,
            lr_schedule: None,
            alpha_schedule: None,
            beta_schedule: None,
            metrics: MetricsTracker::new(),
        }
    }

    /// Replace the loss function
    pub fn with_loss(mut self, loss_fn: Box<dyn LossFn>) -> Self {
        self.loss_fn = loss_fn;
        self
    }

    /// Drive the learning rate from `schedule`, starting now
    pub fn with_lr_schedule(mut self, schedule: Box<dyn Schedule>) -> Self {
        self.optimizer.set_lr(schedule.value());
        self.lr_schedule = Some(schedule);
        self
    }

    /// Drive alpha from `schedule`, broadcasting its initial value now
    pub fn with_alpha_schedule(mut self, schedule: Box<dyn Schedule>) -> Self {
        set_model_alpha(&mut self.model, schedule.value());
        self.alpha_schedule = Some(schedule);
        self
    }

    /// Drive beta from `schedule`, broadcasting its initial value now
    pub fn with_beta_schedule(mut self, schedule: Box<dyn Schedule>) -> Self {
        set_model_beta(&mut self.model, schedule.value());
        self.beta_schedule = Some(schedule);
        self
    }

    pub fn model(&self) -> &Layer {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Layer {
        &mut self.model
    }

    pub fn into_model(self) -> Layer {
        self.model
    }

    /// Get current learning rate
    pub fn lr(&self) -> f32 {
        self.optimizer.lr()
    }

    /// Alpha and beta of the first quantized layer, or zeros for a model without one
    pub fn coefficients(&self) -> (f32, f32) {
        elastic_layers(&self.model)
            .first()
            .map_or((0.0, 0.0), |layer| (layer.alpha(), layer.beta()))
    }

    /// Perform a single training step, returning the batch loss
    pub fn train_step(&mut self, batch: &Batch) -> Result<f32> {
        self.model.set_mode(Mode::Train);

        {
            let mut params = self.model.parameters_mut();
            self.optimizer.zero_grad(&mut params);
        }

        let predictions = self.model.forward(&batch.inputs)?;
        let mut loss = self.loss_fn.forward(&predictions, &batch.targets)?;
        let loss_val = loss
            .item()
            .ok_or_else(|| Error::InvalidParameter("loss tensor is empty".into()))?;

        backward(&mut loss, None);

        {
            let mut params = self.model.parameters_mut();
            self.optimizer.step(&mut params);
        }

        if self.config.clamp_after_step {
            clamp_model(&mut self.model);
        }

        self.metrics.increment_step();
        Ok(loss_val)
    }

    /// Train on every batch once and advance the schedules
    ///
    /// Returns the mean batch loss.
    pub fn train_epoch(&mut self, batches: &[Batch]) -> Result<f32> {
        if batches.is_empty() {
            return Err(Error::InvalidParameter("no training batches".into()));
        }

        let mut total = 0.0;
        for batch in batches {
            total += self.train_step(batch)?;
        }
        let loss = total / batches.len() as f32;

        let (alpha, beta) = self.coefficients();
        let lr = self.lr();
        self.metrics.record_epoch(loss, lr, alpha, beta);
        info!(
            epoch = self.metrics.epoch,
            loss,
            lr,
            alpha,
            beta,
            loss_fn = self.loss_fn.name(),
            "epoch complete"
        );

        self.advance_schedules();
        Ok(loss)
    }

    fn advance_schedules(&mut self) {
        if let Some(schedule) = self.lr_schedule.as_mut() {
            schedule.step();
            self.optimizer.set_lr(schedule.value());
        }
        if let Some(schedule) = self.alpha_schedule.as_mut() {
            schedule.step();
            set_model_alpha(&mut self.model, schedule.value());
        }
        if let Some(schedule) = self.beta_schedule.as_mut() {
            schedule.step();
            set_model_beta(&mut self.model, schedule.value());
        }
    }

    /// Mean loss in evaluation mode, restoring the previous mode afterwards
    pub fn evaluate(&mut self, batches: &[Batch]) -> Result<f32> {
        if batches.is_empty() {
            return Err(Error::InvalidParameter("no evaluation batches".into()));
        }

        let previous = self.model.mode();
        self.model.set_mode(Mode::Eval);
        let result = mean_loss(&self.model, self.loss_fn.as_ref(), batches);
        self.model.set_mode(previous);

        let loss = result?;
        debug!(loss, batches = batches.len(), "evaluated");
        Ok(loss)
    }

    /// Run `config.epochs` epochs over `batches`
    pub fn fit(&mut self, batches: &[Batch]) -> Result<TrainResult> {
        let start = Instant::now();
        let mut final_loss = f32::NAN;
        for _ in 0..self.config.epochs {
            final_loss = self.train_epoch(batches)?;
        }

        Ok(TrainResult {
            final_epoch: self.metrics.epoch,
            final_loss,
            best_loss: self.metrics.best_loss().unwrap_or(final_loss),
            elapsed_secs: start.elapsed().as_secs_f64(),
        })
    }
}

fn mean_loss(model: &Layer, loss_fn: &dyn LossFn, batches: &[Batch]) -> Result<f32> {
    let mut total = 0.0;
    for batch in batches {
        let predictions = model.forward(&batch.inputs)?;
        let loss = loss_fn.forward(&predictions, &batch.targets)?;
        total += loss.item().unwrap_or(0.0);
    }
    Ok(total / batches.len() as f32)
}
