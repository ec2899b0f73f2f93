use crate::ConfigResult;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a duration in milliseconds is positive
    pub fn validate_positive_ms(value: u64, field_name: &str) -> ConfigResult<()> {
        if value == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        Ok(())
    }

    /// Backoff multipliers below 1.0 would shrink the suspend window
    pub fn validate_progression_factor(factor: f64, field_name: &str) -> ConfigResult<()> {
        if !factor.is_finite() || factor < 1.0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be a finite number >= 1.0"
            )));
        }
        Ok(())
    }

    /// Validate that an endpoint address carries a scheme
    pub fn validate_uri(uri: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(uri, field_name)?;
        if !uri.contains("://") {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be a valid URI with protocol"
            )));
        }
        Ok(())
    }
}
