//! The digit-collection state machine.
//!
//! One flow per call: an ordered stage list where each stage moves
//! `pending -> completed | failed`. Submissions validate against the current
//! stage's rules; failures consume the stage's retry budget; success
//! advances to the next pending stage (already-completed stages are skipped)
//! until every stage is complete.
//!
//! A stage that exhausts its retry budget fails the flow. The flow never
//! auto-advances past a failed stage; the caller decides whether to abandon
//! the call.
//!
//! # Concurrency
//!
//! Per-call state is independent; calls never contend with each other beyond
//! the brief map lock. Within one call, callers serialize `submit` (a call
//! has a single active input channel).
//!
//! # Lifetime
//!
//! Flow state is in-memory only. It is discarded when the flow completes,
//! and otherwise held (including after a flow failure) until the call
//! reaches a terminal status and the reconciler calls [`InputStepEngine::clear`];
//! a failed flow must stay visible so the terminal outcome can account
//! for it.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{CallId, StageKey};

use super::stage::{
    StageDefinition, SubmitError, ValueRule, capture_for_audit, validate_digits,
};

/// Flow-level errors: configuration problems and missing flows.
///
/// These are configuration errors: the caller logs and skips, the process
/// never crashes.
#[derive(Debug, Error)]
pub enum FlowError {
    /// A flow must contain at least one stage.
    #[error("flow for call {0} has no stages")]
    EmptyFlow(CallId),

    /// Stage keys must be unique within a call's configuration.
    #[error("duplicate stage key {key} in flow for call {call_id}")]
    DuplicateStageKey { call_id: CallId, key: StageKey },

    /// A stage's pattern rule does not compile.
    #[error("invalid pattern for stage {key}: {message}")]
    InvalidPattern { key: StageKey, message: String },

    /// No flow is installed for the call.
    #[error("no active input flow for call {0}")]
    NoActiveFlow(CallId),
}

/// Completion status of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Completed,
    Failed,
}

/// Caller-facing view of a stage, returned for prompting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageInfo {
    pub key: StageKey,
    pub label: String,
    pub prompt: String,
}

impl StageInfo {
    fn from_definition(definition: &StageDefinition) -> Self {
        StageInfo {
            key: definition.key.clone(),
            label: definition.label.clone(),
            prompt: definition.prompt.clone(),
        }
    }
}

/// Result of one `submit` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The submission was invalid; the caller should re-prompt.
    Rejected {
        error: SubmitError,
        attempts_remaining: u32,
    },

    /// The current stage exhausted its retry budget (or had already failed).
    /// The flow is stuck; the caller decides what to do with the call.
    FlowFailed { stage: StageKey },

    /// The submission was valid; prompt for the next stage.
    Advanced { next: StageInfo },

    /// The submission was valid and no pending stages remain.
    FlowComplete,
}

/// Runtime state for one stage.
#[derive(Debug)]
struct StageState {
    definition: StageDefinition,
    /// Compiled once at flow start when the stage has a pattern rule.
    compiled: Option<Regex>,
    attempts: u32,
    status: StageStatus,
    /// Last captured digits, masked when the stage is sensitive.
    last_captured: Option<String>,
}

/// In-memory state of one call's flow.
#[derive(Debug)]
struct CallInputState {
    stages: Vec<StageState>,
    current: usize,
}

impl CallInputState {
    fn has_unconfirmed(&self) -> bool {
        self.stages.iter().any(|s| s.status != StageStatus::Completed)
    }
}

/// The input step engine: per-call digit-collection flows.
pub struct InputStepEngine {
    flows: Mutex<HashMap<CallId, CallInputState>>,
}

impl InputStepEngine {
    pub fn new() -> Self {
        InputStepEngine {
            flows: Mutex::new(HashMap::new()),
        }
    }

    /// Installs an ordered stage list for a call and returns the first stage
    /// for prompting. Replaces any existing flow for the call.
    pub fn start_flow(
        &self,
        call_id: &CallId,
        definitions: Vec<StageDefinition>,
    ) -> Result<StageInfo, FlowError> {
        if definitions.is_empty() {
            return Err(FlowError::EmptyFlow(call_id.clone()));
        }

        let mut keys = HashSet::new();
        for definition in &definitions {
            if !keys.insert(definition.key.clone()) {
                return Err(FlowError::DuplicateStageKey {
                    call_id: call_id.clone(),
                    key: definition.key.clone(),
                });
            }
        }

        let mut stages = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let compiled = match &definition.rule {
                Some(ValueRule::Pattern { pattern }) => {
                    let re = Regex::new(pattern).map_err(|e| FlowError::InvalidPattern {
                        key: definition.key.clone(),
                        message: e.to_string(),
                    })?;
                    Some(re)
                }
                _ => None,
            };
            stages.push(StageState {
                definition,
                compiled,
                attempts: 0,
                status: StageStatus::Pending,
                last_captured: None,
            });
        }

        let first = StageInfo::from_definition(&stages[0].definition);

        info!(call_id = %call_id, stages = stages.len(), "input flow started");

        let mut flows = self.flows.lock().expect("flow mutex poisoned");
        flows.insert(call_id.clone(), CallInputState { stages, current: 0 });

        Ok(first)
    }

    /// Validates a submission against the call's current stage.
    ///
    /// Must not be invoked concurrently for the same call (callers serialize
    /// per call; there is one active input channel per call).
    pub fn submit(&self, call_id: &CallId, digits: &str) -> Result<SubmitOutcome, FlowError> {
        let mut flows = self.flows.lock().expect("flow mutex poisoned");
        let state = flows
            .get_mut(call_id)
            .ok_or_else(|| FlowError::NoActiveFlow(call_id.clone()))?;

        let current = state.current;
        let stage = &mut state.stages[current];
        let key = stage.definition.key.clone();

        if stage.status == StageStatus::Failed {
            // No auto-advance past a failed stage.
            debug!(call_id = %call_id, stage = %key, "submission for failed stage");
            return Ok(SubmitOutcome::FlowFailed { stage: key });
        }

        stage.last_captured = Some(capture_for_audit(&stage.definition, digits));

        if let Err(error) = validate_digits(&stage.definition, stage.compiled.as_ref(), digits) {
            stage.attempts += 1;
            if stage.attempts >= stage.definition.max_attempts {
                stage.status = StageStatus::Failed;
                warn!(
                    call_id = %call_id,
                    stage = %key,
                    attempts = stage.attempts,
                    code = error.code(),
                    "stage exhausted retry budget, flow failed"
                );
                return Ok(SubmitOutcome::FlowFailed { stage: key });
            }

            let attempts_remaining = stage.definition.max_attempts - stage.attempts;
            debug!(
                call_id = %call_id,
                stage = %key,
                code = error.code(),
                attempts_remaining,
                "submission rejected"
            );
            return Ok(SubmitOutcome::Rejected {
                error,
                attempts_remaining,
            });
        }

        stage.status = StageStatus::Completed;
        debug!(call_id = %call_id, stage = %key, "stage completed");

        // Advance to the next pending stage; already-completed stages are
        // skipped even if re-visited.
        let next_pending = state
            .stages
            .iter()
            .enumerate()
            .skip(current + 1)
            .find(|(_, s)| s.status == StageStatus::Pending)
            .map(|(i, _)| i);
        let all_confirmed = !state.has_unconfirmed();
        // A stage before the current one may have failed earlier; the flow
        // can then never complete.
        let earlier_failure = state
            .stages
            .iter()
            .find(|s| s.status == StageStatus::Failed)
            .map(|s| s.definition.key.clone());

        match next_pending {
            Some(next) => {
                state.current = next;
                Ok(SubmitOutcome::Advanced {
                    next: StageInfo::from_definition(&state.stages[next].definition),
                })
            }
            None if all_confirmed => {
                info!(call_id = %call_id, "input flow complete");
                flows.remove(call_id);
                Ok(SubmitOutcome::FlowComplete)
            }
            None => Ok(SubmitOutcome::FlowFailed {
                stage: earlier_failure.unwrap_or(key),
            }),
        }
    }

    /// The stage the call is currently collecting, if a flow is active.
    pub fn current_stage(&self, call_id: &CallId) -> Option<StageInfo> {
        let flows = self.flows.lock().expect("flow mutex poisoned");
        flows
            .get(call_id)
            .map(|state| StageInfo::from_definition(&state.stages[state.current].definition))
    }

    /// Returns true if the call has a flow with any stage not yet completed.
    ///
    /// Stages that were never reached count as unconfirmed: a flow abandoned
    /// early fails the call's outcome.
    pub fn has_unconfirmed(&self, call_id: &CallId) -> bool {
        let flows = self.flows.lock().expect("flow mutex poisoned");
        flows.get(call_id).map(|s| s.has_unconfirmed()).unwrap_or(false)
    }

    /// Discards the call's flow state (terminal status cleanup).
    pub fn clear(&self, call_id: &CallId) {
        let mut flows = self.flows.lock().expect("flow mutex poisoned");
        if flows.remove(call_id).is_some() {
            debug!(call_id = %call_id, "input state discarded");
        }
    }

    /// Number of calls with active flow state.
    pub fn active_flows(&self) -> usize {
        self.flows.lock().expect("flow mutex poisoned").len()
    }
}

impl Default for InputStepEngine {
    fn default() -> Self {
        Self::new()
    }
}
