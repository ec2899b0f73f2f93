use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use mediation_config::EndpointDefaults;
use mediation_core::{ExpressionEvaluator, MessageContext, PolicyValue};

use crate::definition::{EndpointDefinition, ErrorCodeList, RetryConfig};

/// Endpoint health state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointState {
    /// Normal operation
    Active,
    /// Failures observed, still below the suspension threshold
    Retrying,
    /// Excluded from dispatch until the suspension elapses
    Suspended,
}

/// Suspend and retry policy resolved against one message.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspendSettings {
    pub suspend_codes: ErrorCodeList,
    pub mark_codes: ErrorCodeList,
    pub initial: Duration,
    pub progression: f64,
    pub maximum: Duration,
    pub retries_before_suspension: u32,
    pub retry_delay: Duration,
    pub retry: RetryConfig,
}

impl SuspendSettings {
    /// Settings built purely from defaults, used when a definition carries no
    /// suspension policy.
    pub fn from_defaults(defaults: &EndpointDefaults) -> Self {
        Self {
            suspend_codes: ErrorCodeList::default(),
            mark_codes: ErrorCodeList::default(),
            initial: Duration::from_millis(defaults.initial_suspend_ms),
            progression: defaults.progression_factor,
            maximum: Duration::from_millis(defaults.maximum_suspend_ms),
            retries_before_suspension: defaults.retries_before_suspension,
            retry_delay: Duration::from_millis(defaults.retry_delay_ms),
            retry: RetryConfig::default(),
        }
    }

    /// Resolves every policy field at the moment of use. A field whose
    /// expression cannot be evaluated falls back to the configured default.
    pub fn resolve(
        definition: &EndpointDefinition,
        ctx: &MessageContext,
        evaluator: &dyn ExpressionEvaluator,
        defaults: &EndpointDefaults,
    ) -> Self {
        let mut settings = Self::from_defaults(defaults);
        settings.retry = definition.retry_config();

        if let Some(suspend) = &definition.suspend_on_failure {
            settings.suspend_codes = resolve_codes(
                &suspend.error_codes,
                ctx,
                evaluator,
                "suspend_on_failure.error_codes",
            );
            if let Some(initial) = &suspend.initial_duration_ms {
                let ms = initial.resolve_or(
                    ctx,
                    evaluator,
                    defaults.initial_suspend_ms,
                    "suspend_on_failure.initial_duration_ms",
                );
                settings.initial = Duration::from_millis(ms);
            }
            if let Some(factor) = &suspend.progression_factor {
                let factor = factor.resolve_or(
                    ctx,
                    evaluator,
                    defaults.progression_factor,
                    "suspend_on_failure.progression_factor",
                );
                settings.progression = if factor.is_finite() && factor >= 1.0 {
                    factor
                } else {
                    warn!("挂起递增因子 {} 无效，使用默认值", factor);
                    defaults.progression_factor
                };
            }
            if let Some(maximum) = &suspend.maximum_duration_ms {
                let ms = maximum.resolve_or(
                    ctx,
                    evaluator,
                    defaults.maximum_suspend_ms,
                    "suspend_on_failure.maximum_duration_ms",
                );
                settings.maximum = Duration::from_millis(ms);
            }
        }

        if let Some(mark) = &definition.mark_for_suspension {
            settings.mark_codes = resolve_codes(
                &mark.error_codes,
                ctx,
                evaluator,
                "mark_for_suspension.error_codes",
            );
            if let Some(retries) = &mark.retries_before_suspension {
                settings.retries_before_suspension = retries.resolve_or(
                    ctx,
                    evaluator,
                    defaults.retries_before_suspension,
                    "mark_for_suspension.retries_before_suspension",
                );
            }
            if let Some(delay) = &mark.retry_delay_ms {
                let ms = delay.resolve_or(
                    ctx,
                    evaluator,
                    defaults.retry_delay_ms,
                    "mark_for_suspension.retry_delay_ms",
                );
                settings.retry_delay = Duration::from_millis(ms);
            }
        }

        if settings.maximum < settings.initial {
            settings.maximum = settings.initial;
        }
        settings
    }

    /// Whether a failure with `code` counts towards suspension and may be
    /// retried.
    pub fn is_retry_eligible(&self, code: i32) -> bool {
        self.retry.is_retry_eligible(code)
            && (self.mark_codes.is_empty() || self.mark_codes.contains(code))
    }

    pub fn suspends_immediately(&self, code: i32) -> bool {
        self.suspend_codes.contains(code)
    }

    fn grow(&self, current: Duration) -> Duration {
        let next = Duration::from_millis((current.as_millis() as f64 * self.progression) as u64);
        std::cmp::min(next, self.maximum)
    }
}

fn resolve_codes(
    codes: &Option<PolicyValue<ErrorCodeList>>,
    ctx: &MessageContext,
    evaluator: &dyn ExpressionEvaluator,
    field: &str,
) -> ErrorCodeList {
    codes
        .as_ref()
        .map(|codes| codes.resolve_or(ctx, evaluator, ErrorCodeList::default(), field))
        .unwrap_or_default()
}

/// Outcome of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Below the threshold; the caller may retry after `delay`
    Retry { delay: Duration },
    /// The endpoint is now suspended for `duration`
    Suspended { duration: Duration },
    /// The code is not eligible for retry; the fault surfaces as is
    Surface,
}

#[derive(Debug, Clone)]
struct HealthState {
    state: EndpointState,
    consecutive_failures: u32,
    current_suspend: Option<Duration>,
    suspended_until: Option<Instant>,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    suspensions: u64,
}

impl HealthState {
    fn new() -> Self {
        Self {
            state: EndpointState::Active,
            consecutive_failures: 0,
            current_suspend: None,
            suspended_until: None,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            suspensions: 0,
        }
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.suspended_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default()
    }
}

/// Serializable view of an endpoint's health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub state: EndpointState,
    pub consecutive_failures: u32,
    pub current_suspend_ms: Option<u64>,
    pub remaining_suspend_ms: u64,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub suspensions: u64,
}

impl HealthSnapshot {
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 / self.total_calls as f64
        }
    }
}

/// Runtime health of one endpoint, shared by every message that targets it.
/// All transitions happen under the inner lock.
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    name: String,
    inner: Arc<Mutex<HealthState>>,
}

impl EndpointHealth {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(HealthState::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks whether a dispatch may proceed. While suspended with an
    /// unelapsed deadline returns the remaining suspension.
    pub async fn check_ready(&self) -> Result<(), Duration> {
        let state = self.inner.lock().await;
        if state.state == EndpointState::Suspended {
            let remaining = state.remaining(Instant::now());
            if !remaining.is_zero() {
                return Err(remaining);
            }
            debug!("端点 {} 挂起期已结束，允许探测请求", self.name);
        }
        Ok(())
    }

    pub async fn record_success(&self) {
        let mut state = self.inner.lock().await;
        state.total_calls += 1;
        state.successful_calls += 1;

        if state.state != EndpointState::Active {
            info!(
                "端点 {} 恢复正常 (之前状态: {:?}, 连续失败: {})",
                self.name, state.state, state.consecutive_failures
            );
        }
        state.state = EndpointState::Active;
        state.consecutive_failures = 0;
        state.current_suspend = None;
        state.suspended_until = None;
    }

    /// Applies a failure with `code` and reports what the caller may do next.
    pub async fn record_failure(&self, code: i32, settings: &SuspendSettings) -> FailureVerdict {
        let mut state = self.inner.lock().await;
        state.total_calls += 1;
        state.failed_calls += 1;

        if settings.suspends_immediately(code) {
            state.consecutive_failures += 1;
            let duration = self.suspend(&mut state, settings);
            return FailureVerdict::Suspended { duration };
        }

        if !settings.is_retry_eligible(code) {
            debug!("端点 {} 错误码 {} 不参与重试与挂起判定", self.name, code);
            return FailureVerdict::Surface;
        }

        state.consecutive_failures += 1;
        if state.state != EndpointState::Suspended
            && state.consecutive_failures <= settings.retries_before_suspension
        {
            state.state = EndpointState::Retrying;
            debug!(
                "端点 {} 失败 {}/{}，{}ms 后重试",
                self.name,
                state.consecutive_failures,
                settings.retries_before_suspension,
                settings.retry_delay.as_millis()
            );
            return FailureVerdict::Retry {
                delay: settings.retry_delay,
            };
        }

        let duration = self.suspend(&mut state, settings);
        FailureVerdict::Suspended { duration }
    }

    fn suspend(&self, state: &mut HealthState, settings: &SuspendSettings) -> Duration {
        let duration = match (state.state, state.current_suspend) {
            (EndpointState::Suspended, Some(current)) => settings.grow(current),
            _ => std::cmp::min(settings.initial, settings.maximum),
        };
        state.state = EndpointState::Suspended;
        state.current_suspend = Some(duration);
        state.suspended_until = Some(Instant::now() + duration);
        state.suspensions += 1;

        warn!(
            "端点 {} 已挂起 {}ms (连续失败: {})",
            self.name,
            duration.as_millis(),
            state.consecutive_failures
        );
        duration
    }

    pub async fn state(&self) -> EndpointState {
        self.inner.lock().await.state
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        let state = self.inner.lock().await;
        HealthSnapshot {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            current_suspend_ms: state.current_suspend.map(|d| d.as_millis() as u64),
            remaining_suspend_ms: state.remaining(Instant::now()).as_millis() as u64,
            total_calls: state.total_calls,
            successful_calls: state.successful_calls,
            failed_calls: state.failed_calls,
            suspensions: state.suspensions,
        }
    }

    /// Forces the endpoint back to `Active` (maintenance)
    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        *state = HealthState::new();
        info!("端点 {} 健康状态已重置", self.name);
    }
}
