//! Optimizers and value schedules

mod adam;
mod optimizer;
mod scheduler;
mod sgd;

pub use adam::Adam;
pub use optimizer::Optimizer;
pub use scheduler::{Constant, CosineAnnealing, LinearAnnealing, Schedule};
pub use sgd::SGD;
