//! Declarative YAML configuration
//!
//! A QAT configuration names the target grid, the initial elastic
//! coefficients and their schedules, and the optimizer.
//!
//! # Example
//!
//! ```yaml
//! quantize:
//!   grid:
//!     family: geometric
//!     gamma: 2.0
//!     init: 0.125
//!     size: 4
//!   elastic:
//!     alpha: 1.0
//!     beta: 0.0
//!   alpha_schedule:
//!     kind: linear
//!     start: 1.0
//!     end: 0.0
//!     steps: 20
//!
//! optimizer:
//!   name: sgd
//!   lr: 0.05
//!   momentum: 0.9
//!
//! training:
//!   epochs: 30
//! ```

mod builder;
mod cli;
mod load;
mod schema;
mod validate;


pub use builder::{build_optimizer, build_schedule, build_trainer};
pub use cli::{parse_args, Cli, Command, InfoArgs, OutputFormat, ProjectArgs, ValidateArgs};
pub use load::{load_config, parse_config};
pub use schema::{ElasticSpec, OptimSpec, QatSpec, QuantSpec, ScheduleSpec, TrainingParams};
pub use validate::{validate_config, ValidationError};
