//! Keypad input collection: stage definitions, validation, and the per-call
//! flow state machine.

pub mod engine;
pub mod stage;

pub use engine::{FlowError, InputStepEngine, StageInfo, StageStatus, SubmitOutcome};
pub use stage::{
    LengthRule, MASK_CHAR, StageDefinition, SubmitError, ValueRule, mask_digits,
};
