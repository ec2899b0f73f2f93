//! In-memory doubles for the dispatch collaborators
//!
//! `MockTransport` replaces network I/O, `MapExpressionEvaluator` replaces the
//! expression language and `RecordingMediator` stands in for child sequences.
//! All of them record what they saw so tests can assert on it.

use async_trait::async_trait;
use mediation_core::{
    ExpressionError, ExpressionEvaluator, Mediator, MessageContext, Payload,
    PropertyLookupEvaluator,
};
use mediation_endpoint::{EndpointDefinition, Transport, TransportFault};
use mediation_errors::{MediationError, MediationResult};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a mock transport does with one send
#[derive(Debug, Clone)]
pub enum TransportOutcome {
    Success,
    /// Succeeds and replaces the body with the reply
    Respond(Payload),
    Fault(TransportFault),
    /// Never completes; only an endpoint timeout ends the call
    Hang,
    Delayed(Duration, Box<TransportOutcome>),
}

impl TransportOutcome {
    pub fn fault(code: i32, message: &str) -> Self {
        TransportOutcome::Fault(TransportFault::new(code, message))
    }

    pub fn respond_json(value: Value) -> Self {
        TransportOutcome::Respond(Payload::json(value))
    }

    pub fn after(self, delay: Duration) -> Self {
        TransportOutcome::Delayed(delay, Box::new(self))
    }
}

/// One recorded transport call
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Endpoint address, or the message's implicit destination
    pub address: Option<String>,
    pub context: MessageContext,
}

#[derive(Debug)]
struct TransportState {
    script: VecDeque<TransportOutcome>,
    by_address: HashMap<String, VecDeque<TransportOutcome>>,
    default_outcome: TransportOutcome,
    calls: Vec<SentMessage>,
}

impl TransportState {
    fn next_outcome(&mut self, address: Option<&str>) -> TransportOutcome {
        if let Some(queue) = address.and_then(|a| self.by_address.get_mut(a)) {
            if let Some(outcome) = queue.pop_front() {
                return outcome;
            }
        }
        self.script
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

/// Scripted transport. Outcomes are consumed per address first, then from the
/// shared script, then the default outcome (success) applies.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                script: VecDeque::new(),
                by_address: HashMap::new(),
                default_outcome: TransportOutcome::Success,
                calls: Vec::new(),
            })),
        }
    }

    pub fn with_outcomes(outcomes: Vec<TransportOutcome>) -> Self {
        let transport = Self::new();
        transport.state.lock().unwrap().script.extend(outcomes);
        transport
    }

    pub fn with_default(self, outcome: TransportOutcome) -> Self {
        self.state.lock().unwrap().default_outcome = outcome;
        self
    }

    pub fn push_outcome(&self, outcome: TransportOutcome) {
        self.state.lock().unwrap().script.push_back(outcome);
    }

    pub fn script_address(&self, address: &str, outcomes: Vec<TransportOutcome>) {
        self.state
            .lock()
            .unwrap()
            .by_address
            .entry(address.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn calls_to(&self, address: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.address.as_deref() == Some(address))
            .count()
    }

    pub fn calls(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Context as the transport saw it on the most recent call
    pub fn last_sent(&self) -> Option<MessageContext> {
        self.state
            .lock()
            .unwrap()
            .calls
            .last()
            .map(|call| call.context.clone())
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.calls.clear();
        state.script.clear();
        state.by_address.clear();
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        endpoint: Option<&EndpointDefinition>,
        ctx: &mut MessageContext,
    ) -> Result<(), TransportFault> {
        let address = endpoint
            .and_then(|definition| definition.address.clone())
            .or_else(|| ctx.to.clone());

        let mut outcome = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(SentMessage {
                address: address.clone(),
                context: ctx.clone(),
            });
            state.next_outcome(address.as_deref())
        };

        loop {
            match outcome {
                TransportOutcome::Success => return Ok(()),
                TransportOutcome::Respond(payload) => {
                    ctx.set_payload(payload);
                    ctx.response = true;
                    return Ok(());
                }
                TransportOutcome::Fault(fault) => return Err(fault),
                TransportOutcome::Hang => {
                    return std::future::pending::<Result<(), TransportFault>>().await;
                }
                TransportOutcome::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    outcome = *inner;
                }
            }
        }
    }
}

type ExpressionFn = Arc<dyn Fn(&MessageContext) -> Result<Value, ExpressionError> + Send + Sync>;

/// Evaluator backed by fixed values and closures. Unknown expressions fall
/// through to [`PropertyLookupEvaluator`].
#[derive(Clone, Default)]
pub struct MapExpressionEvaluator {
    values: HashMap<String, Value>,
    functions: HashMap<String, ExpressionFn>,
    evaluated: Arc<Mutex<Vec<String>>>,
}

impl MapExpressionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, expression: &str, value: Value) -> Self {
        self.values.insert(expression.to_string(), value);
        self
    }

    pub fn with_fn<F>(mut self, expression: &str, f: F) -> Self
    where
        F: Fn(&MessageContext) -> Result<Value, ExpressionError> + Send + Sync + 'static,
    {
        self.functions.insert(expression.to_string(), Arc::new(f));
        self
    }

    /// Makes `expression` fail evaluation
    pub fn failing(self, expression: &str) -> Self {
        let text = expression.to_string();
        self.with_fn(expression, move |_| Err(ExpressionError::Unsupported(text.clone())))
    }

    /// Expressions evaluated so far, in call order
    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.lock().unwrap().clone()
    }

    pub fn evaluation_count(&self, expression: &str) -> usize {
        self.evaluated
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == expression)
            .count()
    }
}

impl std::fmt::Debug for MapExpressionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapExpressionEvaluator")
            .field("values", &self.values)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExpressionEvaluator for MapExpressionEvaluator {
    fn evaluate(&self, expression: &str, ctx: &MessageContext) -> Result<Value, ExpressionError> {
        self.evaluated.lock().unwrap().push(expression.to_string());
        if let Some(f) = self.functions.get(expression) {
            return f(ctx);
        }
        if let Some(value) = self.values.get(expression) {
            return Ok(value.clone());
        }
        PropertyLookupEvaluator.evaluate(expression, ctx)
    }
}

/// Child sequence double. Applies its configured edits to the message and
/// records every message id it mediated.
#[derive(Debug, Clone)]
pub struct RecordingMediator {
    name: String,
    result: bool,
    error: Option<MediationError>,
    payload: Option<Payload>,
    properties: Vec<(String, Value)>,
    delay: Option<Duration>,
    divert_to_fault: bool,
    seen: Arc<Mutex<Vec<uuid::Uuid>>>,
}

impl RecordingMediator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            result: true,
            error: None,
            payload: None,
            properties: Vec::new(),
            delay: None,
            divert_to_fault: false,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_result(mut self, result: bool) -> Self {
        self.result = result;
        self
    }

    pub fn with_error(mut self, error: MediationError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.push((key.to_string(), value));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Runs the message's fault-handler chain and stops the flow, as a
    /// sequence whose dispatch failed would.
    pub fn diverting_to_fault(mut self) -> Self {
        self.divert_to_fault = true;
        self
    }

    pub fn invocations(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen_ids(&self) -> Vec<uuid::Uuid> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mediator for RecordingMediator {
    async fn mediate(&self, ctx: &mut MessageContext) -> MediationResult<bool> {
        self.seen.lock().unwrap().push(ctx.id());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        for (key, value) in &self.properties {
            ctx.set_property(key.as_str(), value.clone());
        }
        if let Some(payload) = &self.payload {
            ctx.set_payload(payload.clone());
        }
        if self.divert_to_fault {
            ctx.handle_fault().await?;
            return Ok(false);
        }
        Ok(self.result)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
