//! Compute device tags

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device a tensor is placed on
///
/// Storage always lives in host memory; the tag records placement so that
/// operations can refuse to mix tensors from different devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    /// Host CPU
    #[default]
    Cpu,
    /// Indexed accelerator (e.g. a GPU ordinal)
    Accelerator(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator(index) => write!(f, "accelerator:{index}"),
        }
    }
}
