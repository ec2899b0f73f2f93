use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// Defaults applied to scatter-gather mediators that leave a field unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScatterGatherDefaults {
    pub parallel_execution: bool,
    /// Aggregation deadline; `None` waits for every branch
    pub timeout_ms: Option<u64>,
}

impl Default for ScatterGatherDefaults {
    fn default() -> Self {
        Self {
            parallel_execution: true,
            timeout_ms: None,
        }
    }
}

impl ConfigValidator for ScatterGatherDefaults {
    fn validate(&self) -> crate::ConfigResult<()> {
        if let Some(timeout) = self.timeout_ms {
            ValidationUtils::validate_positive_ms(timeout, "scatter_gather.timeout_ms")?;
        }
        Ok(())
    }
}
