use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Address,
    Wsdl,
    Default,
    Indirect,
}

/// A named endpoint declaration. The policy block is kept as raw data here and
/// parsed into an endpoint definition by the endpoint registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointEntry {
    pub name: String,
    pub kind: EndpointKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Registry key for indirect endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<serde_json::Value>,
}

impl ConfigValidator for EndpointEntry {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.name, "endpoints.name")?;
        let field = |name: &str| format!("endpoints.{}.{}", self.name, name);
        match self.kind {
            EndpointKind::Address => {
                let uri = self.uri.as_deref().unwrap_or_default();
                ValidationUtils::validate_uri(uri, &field("uri"))
            }
            EndpointKind::Wsdl => {
                let uri = self.uri.as_deref().unwrap_or_default();
                ValidationUtils::validate_uri(uri, &field("uri"))?;
                ValidationUtils::validate_not_empty(
                    self.service.as_deref().unwrap_or_default(),
                    &field("service"),
                )?;
                ValidationUtils::validate_not_empty(
                    self.port.as_deref().unwrap_or_default(),
                    &field("port"),
                )
            }
            EndpointKind::Indirect => ValidationUtils::validate_not_empty(
                self.key.as_deref().unwrap_or_default(),
                &field("key"),
            ),
            EndpointKind::Default => Ok(()),
        }
    }
}
