use std::sync::Arc;

use anyhow::{Context, Result};
use mediation_config::AppConfig;
use mediation_core::{MessageContext, PropertyLookupEvaluator};
use mediation_dispatcher::{AggregateContentType, ResultTarget, ScatterGatherConfig};
use mediation_endpoint::{
    EndpointKind, EndpointRegistry, HealthSnapshot, MediationEnvironment, SuspendSettings,
};
use tracing::{info, warn};

/// 端点的解析结果，供 `endpoints` 子命令输出
#[derive(Debug, Clone)]
pub struct EndpointReport {
    pub name: String,
    pub kind: String,
    pub address: Option<String>,
    /// 间接端点最终解析到的端点
    pub resolved_to: String,
    pub settings: SuspendSettings,
    pub definition: serde_json::Value,
    pub snapshot: HealthSnapshot,
}

/// 调度核心运行时
///
/// 持有加载后的配置和交给每个中介器的 [`MediationEnvironment`]。
pub struct MediationRuntime {
    config: AppConfig,
    env: MediationEnvironment,
}

impl MediationRuntime {
    /// 由已校验的配置构建端点注册表和中介环境
    pub async fn new(config: AppConfig) -> Result<Self> {
        let registry = EndpointRegistry::from_entries(&config.endpoints)
            .await
            .context("构建端点注册表失败")?;
        let env = MediationEnvironment::new(
            Arc::new(PropertyLookupEvaluator),
            registry,
            config.dispatch.endpoint_defaults.clone(),
        );
        info!("中介运行时已创建，端点数量: {}", config.endpoints.len());
        Ok(Self { config, env })
    }

    pub async fn from_path(config_path: Option<&str>) -> Result<Self> {
        let config = AppConfig::load(config_path)?;
        Self::new(config).await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn environment(&self) -> &MediationEnvironment {
        &self.env
    }

    /// Initializes every registered endpoint; the first failure aborts.
    pub async fn init_endpoints(&self) -> Result<()> {
        let registry = self.env.registry();
        for name in registry.names().await {
            if let Some(endpoint) = registry.get(&name).await {
                endpoint
                    .init(&self.env)
                    .await
                    .with_context(|| format!("初始化端点失败: {name}"))?;
            }
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        let registry = self.env.registry();
        for name in registry.names().await {
            if let Some(endpoint) = registry.get(&name).await {
                endpoint.destroy().await;
            }
        }
        info!("中介运行时已关闭");
    }

    /// Scatter-gather configuration seeded from the `scatter_gather` section
    pub fn scatter_gather_config(
        &self,
        content_type: AggregateContentType,
        result_target: ResultTarget,
    ) -> ScatterGatherConfig {
        ScatterGatherConfig::from_defaults(&self.config.scatter_gather, content_type, result_target)
    }

    /// 端点策略按空消息解析；表达式字段求值失败时退回默认值
    pub async fn endpoint_reports(&self) -> Result<Vec<EndpointReport>> {
        let registry = self.env.registry();
        let probe = MessageContext::new();
        let mut reports = Vec::new();

        for name in registry.names().await {
            let Some(endpoint) = registry.get(&name).await else {
                continue;
            };
            let target = match registry.resolve(&name).await {
                Ok(target) => target,
                Err(e) => {
                    warn!("端点 {} 无法解析: {}", name, e);
                    return Err(e).with_context(|| format!("解析端点失败: {name}"));
                }
            };
            let settings = SuspendSettings::resolve(
                target.definition(),
                &probe,
                self.env.evaluator(),
                self.env.defaults(),
            );
            let (kind, address) = match endpoint.kind() {
                EndpointKind::Address { uri } => ("address", Some(uri.clone())),
                EndpointKind::Wsdl { uri, .. } => ("wsdl", Some(uri.clone())),
                EndpointKind::Default => ("default", None),
                EndpointKind::Indirect { key } => ("indirect", Some(key.clone())),
            };
            reports.push(EndpointReport {
                name: name.clone(),
                kind: kind.to_string(),
                address,
                resolved_to: target.name().to_string(),
                settings,
                definition: serde_json::to_value(target.definition())
                    .context("序列化端点定义失败")?,
                snapshot: endpoint.snapshot(&self.env).await?,
            });
        }
        Ok(reports)
    }
}
