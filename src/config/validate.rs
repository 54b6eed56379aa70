//! Configuration validation

use super::schema::{QatSpec, ScheduleSpec};

/// Validation error type
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid learning rate: {0} (must be > 0.0)")]
    InvalidLearningRate(f32),

    #[error("Invalid epochs: {0} (must be > 0)")]
    InvalidEpochs(usize),

    #[error("Invalid optimizer: {0} (must be one of: adam, sgd)")]
    InvalidOptimizer(String),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Invalid alpha: {0} (must be in [0, 1])")]
    InvalidAlpha(f32),

    #[error("Invalid beta: {0} (must be >= 0)")]
    InvalidBeta(f32),

    #[error("Invalid {name} schedule: {reason}")]
    InvalidSchedule { name: &'static str, reason: String },
}

/// Validate a QAT specification
///
/// Checks:
/// - The grid is well-formed
/// - Alpha lies in `[0, 1]` and beta is non-negative, including every
///   value a schedule can produce
/// - Optimizer name and numeric values are in valid ranges
pub fn validate_config(spec: &QatSpec) -> Result<(), ValidationError> {
    spec.quantize
        .grid
        .validate()
        .map_err(|e| ValidationError::InvalidGrid(e.to_string()))?;

    let elastic = spec.quantize.elastic;
    if !(0.0..=1.0).contains(&elastic.alpha) {
        return Err(ValidationError::InvalidAlpha(elastic.alpha));
    }
    if elastic.beta < 0.0 || elastic.beta.is_nan() {
        return Err(ValidationError::InvalidBeta(elastic.beta));
    }

    if let Some(schedule) = &spec.quantize.alpha_schedule {
        validate_schedule("alpha", schedule, |v| (0.0..=1.0).contains(&v))?;
    }
    if let Some(schedule) = &spec.quantize.beta_schedule {
        validate_schedule("beta", schedule, |v| v >= 0.0)?;
    }

    if spec.optimizer.lr <= 0.0 || spec.optimizer.lr.is_nan() {
        return Err(ValidationError::InvalidLearningRate(spec.optimizer.lr));
    }
    let name = spec.optimizer.name.to_lowercase();
    if name != "adam" && name != "sgd" {
        return Err(ValidationError::InvalidOptimizer(spec.optimizer.name.clone()));
    }

    if spec.training.epochs == 0 {
        return Err(ValidationError::InvalidEpochs(spec.training.epochs));
    }

    Ok(())
}

// Linear and cosine schedules only take values between their endpoints
fn validate_schedule(
    name: &'static str,
    schedule: &ScheduleSpec,
    in_range: impl Fn(f32) -> bool,
) -> Result<(), ValidationError> {
    if let ScheduleSpec::Linear { steps: 0, .. } | ScheduleSpec::Cosine { steps: 0, .. } = schedule
    {
        return Err(ValidationError::InvalidSchedule {
            name,
            reason: "steps must be > 0".into(),
        });
    }
    for value in [schedule.start(), schedule.end()] {
        if !in_range(value) {
            return Err(ValidationError::InvalidSchedule {
                name,
                reason: format!("value {value} out of range"),
            });
        }
    }
    Ok(())
}
