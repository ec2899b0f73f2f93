use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::{
    dispatch::DispatchConfig, endpoints::EndpointEntry, logging::LogConfig,
    scatter_gather::ScatterGatherDefaults,
};
use crate::validation::ConfigValidator;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LogConfig,
    pub dispatch: DispatchConfig,
    pub scatter_gather: ScatterGatherDefaults,
    pub endpoints: Vec<EndpointEntry>,
}

impl AppConfig {
    /// 加载配置：TOML 文件 + `MEDIATION_*` 环境变量覆盖
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/mediation.toml",
                "mediation.toml",
                "/etc/mediation/config.toml",
            ];

            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("MEDIATION")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointEntry> {
        self.endpoints.iter().find(|e| e.name == name)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.logging.validate()?;
        self.dispatch.validate()?;
        self.scatter_gather.validate()?;

        let mut seen = HashSet::new();
        for entry in &self.endpoints {
            entry.validate()?;
            if !seen.insert(entry.name.as_str()) {
                return Err(crate::ConfigError::Validation(format!(
                    "duplicate endpoint name: {}",
                    entry.name
                )));
            }
        }
        Ok(())
    }
}
