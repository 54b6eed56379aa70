//! Build training components from configuration

use super::schema::{OptimSpec, QatSpec, ScheduleSpec};
use crate::error::{Error, Result};
use crate::nn::{quantize_model, set_model_alpha, set_model_beta, Layer};
use crate::optim::{Adam, Constant, CosineAnnealing, LinearAnnealing, Optimizer, Schedule, SGD};
use crate::train::{QatTrainer, TrainConfig};

/// Build optimizer from configuration
pub fn build_optimizer(spec: &OptimSpec) -> Result<Box<dyn Optimizer>> {
    let param = |key: &str, default: f32| {
        spec.params
            .get(key)
            .and_then(|v| v.as_f64())
            .map_or(default, |v| v as f32)
    };

    match spec.name.to_lowercase().as_str() {
        "sgd" => Ok(Box::new(SGD::new(spec.lr, param("momentum", 0.0)))),
        "adam" => Ok(Box::new(Adam::new(
            spec.lr,
            param("beta1", 0.9),
            param("beta2", 0.999),
            param("eps", 1e-8),
        ))),
        name => Err(Error::ConfigError(format!(
            "Unknown optimizer: {}. Supported: sgd, adam",
            name
        ))),
    }
}

/// Build a coefficient schedule from configuration
pub fn build_schedule(spec: &ScheduleSpec) -> Box<dyn Schedule> {
    match *spec {
        ScheduleSpec::Constant { value } => Box::new(Constant::new(value)),
        ScheduleSpec::Linear { start, end, steps } => {
            Box::new(LinearAnnealing::new(start, end, steps))
        }
        ScheduleSpec::Cosine { start, end, steps } => {
            Box::new(CosineAnnealing::new(start, steps, end))
        }
    }
}

/// Quantize `model` per `spec` and wrap it in a ready-to-fit trainer
///
/// Standard `Linear`/`Conv2d` layers are converted onto the configured grid
/// and receive the initial elastic coefficients; schedules, when present,
/// take over from there.
pub fn build_trainer(spec: &QatSpec, mut model: Layer) -> Result<QatTrainer> {
    let quant = &spec.quantize;
    quantize_model(&mut model, &quant.grid)?;
    set_model_alpha(&mut model, quant.elastic.alpha);
    set_model_beta(&mut model, quant.elastic.beta);

    let config = TrainConfig::new()
        .with_epochs(spec.training.epochs)
        .with_clamp_after_step(quant.clamp_after_step);
    let mut trainer = QatTrainer::new(model, build_optimizer(&spec.optimizer)?, config);

    if let Some(schedule) = &quant.alpha_schedule {
        trainer = trainer.with_alpha_schedule(build_schedule(schedule));
    }
    if let Some(schedule) = &quant.beta_schedule {
        trainer = trainer.with_beta_schedule(build_schedule(schedule));
    }
    Ok(trainer)
}
