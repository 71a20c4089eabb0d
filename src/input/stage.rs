//! Stage definitions and digit validation for input collection.
//!
//! A stage is one unit of digit entry with its own length rule, optional
//! value rule, retry budget, and prompts. Stage definitions are static
//! per-call configuration: the ordered list is fixed when the flow starts
//! and never mutated afterwards.
//!
//! Validation failures are expected results, not errors: each distinct
//! failure is a [`SubmitError`] variant with a stable wire code, returned to
//! the caller to drive a retry prompt.

use serde::{Deserialize, Serialize};

use crate::types::StageKey;

/// Character used to replace hidden digits in masked captures.
pub const MASK_CHAR: char = '*';

/// Expected input length for a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LengthRule {
    /// Input must be exactly this many digits.
    Exact { length: usize },

    /// Input length must fall within `[min, max]` inclusive.
    Range { min: usize, max: usize },
}

/// Optional value rule applied after the length check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueRule {
    /// Input must match this regex (anchored by the caller's pattern).
    Pattern { pattern: String },

    /// Input parsed as an integer must fall within `[min, max]` inclusive.
    NumericRange { min: i64, max: i64 },

    /// Input must be one of these values.
    AllowList { values: Vec<String> },
}

/// Static configuration for one input-collection stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique within one call's flow.
    pub key: StageKey,

    /// Human label for logs and downstream rendering.
    pub label: String,

    pub length: LengthRule,

    #[serde(default)]
    pub rule: Option<ValueRule>,

    /// Expected value to match exactly (verification codes).
    #[serde(default)]
    pub expected: Option<String>,

    /// Prompt template played/shown when the stage is entered.
    pub prompt: String,

    #[serde(default)]
    pub success_message: Option<String>,

    #[serde(default)]
    pub failure_message: Option<String>,

    /// Retry ceiling: the stage fails permanently on this many invalid
    /// submissions.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Sensitive stages (the default) mask captured digits for logs/audit.
    #[serde(default = "default_sensitive")]
    pub sensitive: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_sensitive() -> bool {
    true
}

/// Validation failure for one submission. Each variant carries the stable
/// wire code returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum SubmitError {
    /// Empty input.
    NoInput,

    /// Input length differs from the stage's fixed length.
    LengthMismatch { expected: usize },

    /// Input is shorter than the stage's minimum length.
    TooShort { min: usize },

    /// Input is longer than the stage's maximum length.
    TooLong { max: usize },

    /// Input does not match the stage's pattern rule.
    PatternMismatch,

    /// Input is outside the stage's numeric range.
    RangeMismatch,

    /// Input is not in the stage's allow-list.
    NotAllowed,

    /// Input differs from the stage's expected value.
    ValueMismatch,
}

impl SubmitError {
    /// The stable wire code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            SubmitError::NoInput => "no_input",
            SubmitError::LengthMismatch { .. } => "length_mismatch",
            SubmitError::TooShort { .. } => "too_short",
            SubmitError::TooLong { .. } => "too_long",
            SubmitError::PatternMismatch => "pattern_mismatch",
            SubmitError::RangeMismatch => "range_mismatch",
            SubmitError::NotAllowed => "not_allowed",
            SubmitError::ValueMismatch => "value_mismatch",
        }
    }
}

/// Validates `digits` against a stage definition.
///
/// Checks run in a fixed order (empty input, fixed length, min/max length,
/// value rule, expected value) and the first failure wins. `compiled` is
/// the stage's pre-compiled pattern, if it has one (compiled once at flow
/// start).
pub fn validate_digits(
    definition: &StageDefinition,
    compiled: Option<&regex::Regex>,
    digits: &str,
) -> Result<(), SubmitError> {
    if digits.is_empty() {
        return Err(SubmitError::NoInput);
    }

    let len = digits.chars().count();
    match definition.length {
        LengthRule::Exact { length } => {
            if len != length {
                return Err(SubmitError::LengthMismatch { expected: length });
            }
        }
        LengthRule::Range { min, max } => {
            if len < min {
                return Err(SubmitError::TooShort { min });
            }
            if len > max {
                return Err(SubmitError::TooLong { max });
            }
        }
    }

    match &definition.rule {
        Some(ValueRule::Pattern { .. }) => {
            // Pattern validity is checked at flow start; a missing compiled
            // regex here means the rule cannot pass.
            let matched = compiled.map(|re| re.is_match(digits)).unwrap_or(false);
            if !matched {
                return Err(SubmitError::PatternMismatch);
            }
        }
        Some(ValueRule::NumericRange { min, max }) => match digits.parse::<i64>() {
            Ok(value) if value >= *min && value <= *max => {}
            _ => return Err(SubmitError::RangeMismatch),
        },
        Some(ValueRule::AllowList { values }) => {
            if !values.iter().any(|v| v == digits) {
                return Err(SubmitError::NotAllowed);
            }
        }
        None => {}
    }

    if let Some(expected) = &definition.expected {
        if expected != digits {
            return Err(SubmitError::ValueMismatch);
        }
    }

    Ok(())
}

/// Masks a captured digit string for logs/audit.
///
/// Only the last ⌈len/3⌉ digits (at least 1, at most 2) stay visible; the
/// rest are replaced with [`MASK_CHAR`]. Strings of length ≤ 2 are fully
/// masked.
pub fn mask_digits(digits: &str) -> String {
    let len = digits.chars().count();
    if len <= 2 {
        return MASK_CHAR.to_string().repeat(len);
    }

    let visible = len.div_ceil(3).clamp(1, 2);
    let hidden = len - visible;

    let mut masked = MASK_CHAR.to_string().repeat(hidden);
    masked.extend(digits.chars().skip(hidden));
    masked
}

/// Returns the captured value recorded for a stage: masked when the stage is
/// sensitive, verbatim otherwise.
pub fn capture_for_audit(definition: &StageDefinition, digits: &str) -> String {
    if definition.sensitive {
        mask_digits(digits)
    } else {
        digits.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stage(length: LengthRule) -> StageDefinition {
        StageDefinition {
            key: StageKey::new("test"),
            label: "Test".to_string(),
            length,
            rule: None,
            expected: None,
            prompt: "Enter digits".to_string(),
            success_message: None,
            failure_message: None,
            max_attempts: 3,
            sensitive: true,
        }
    }

    mod validation_order {
        use super::*;

        #[test]
        fn empty_input_wins_over_everything() {
            let mut def = stage(LengthRule::Exact { length: 4 });
            def.expected = Some("1234".to_string());
            assert_eq!(validate_digits(&def, None, ""), Err(SubmitError::NoInput));
        }

        #[test]
        fn fixed_length_checked_before_value_rule() {
            let mut def = stage(LengthRule::Exact { length: 4 });
            def.rule = Some(ValueRule::NumericRange { min: 0, max: 9999 });
            assert_eq!(
                validate_digits(&def, None, "123"),
                Err(SubmitError::LengthMismatch { expected: 4 })
            );
        }

        #[test]
        fn range_length_reports_direction() {
            let def = stage(LengthRule::Range { min: 3, max: 5 });
            assert_eq!(
                validate_digits(&def, None, "12"),
                Err(SubmitError::TooShort { min: 3 })
            );
            assert_eq!(
                validate_digits(&def, None, "123456"),
                Err(SubmitError::TooLong { max: 5 })
            );
            assert_eq!(validate_digits(&def, None, "1234"), Ok(()));
        }

        #[test]
        fn pattern_rule() {
            let mut def = stage(LengthRule::Range { min: 1, max: 10 });
            def.rule = Some(ValueRule::Pattern {
                pattern: "^[0-9]+#$".to_string(),
            });
            let re = regex::Regex::new("^[0-9]+#$").unwrap();
            assert_eq!(validate_digits(&def, Some(&re), "123#"), Ok(()));
            assert_eq!(
                validate_digits(&def, Some(&re), "123"),
                Err(SubmitError::PatternMismatch)
            );
        }

        #[test]
        fn numeric_range_rule() {
            let mut def = stage(LengthRule::Range { min: 1, max: 4 });
            def.rule = Some(ValueRule::NumericRange { min: 100, max: 500 });
            assert_eq!(validate_digits(&def, None, "250"), Ok(()));
            assert_eq!(
                validate_digits(&def, None, "99"),
                Err(SubmitError::RangeMismatch)
            );
            assert_eq!(
                validate_digits(&def, None, "501"),
                Err(SubmitError::RangeMismatch)
            );
        }

        #[test]
        fn non_numeric_input_fails_numeric_range() {
            let mut def = stage(LengthRule::Range { min: 1, max: 4 });
            def.rule = Some(ValueRule::NumericRange { min: 0, max: 9999 });
            assert_eq!(
                validate_digits(&def, None, "12#4"),
                Err(SubmitError::RangeMismatch)
            );
        }

        #[test]
        fn allow_list_rule() {
            let mut def = stage(LengthRule::Exact { length: 1 });
            def.rule = Some(ValueRule::AllowList {
                values: vec!["1".to_string(), "2".to_string()],
            });
            assert_eq!(validate_digits(&def, None, "1"), Ok(()));
            assert_eq!(
                validate_digits(&def, None, "3"),
                Err(SubmitError::NotAllowed)
            );
        }

        #[test]
        fn expected_value_checked_last() {
            let mut def = stage(LengthRule::Exact { length: 4 });
            def.expected = Some("9999".to_string());
            assert_eq!(validate_digits(&def, None, "9999"), Ok(()));
            assert_eq!(
                validate_digits(&def, None, "9998"),
                Err(SubmitError::ValueMismatch)
            );
        }
    }

    mod masking {
        use super::*;

        #[test]
        fn spec_examples() {
            assert_eq!(mask_digits("123456"), "****56");
            assert_eq!(mask_digits("12"), "**");
            assert_eq!(mask_digits("1"), "*");
            assert_eq!(mask_digits(""), "");
        }

        #[test]
        fn short_strings_show_one_digit() {
            assert_eq!(mask_digits("123"), "**3");
        }

        #[test]
        fn visible_suffix_caps_at_two() {
            assert_eq!(mask_digits("1234567890"), "********90");
        }

        #[test]
        fn non_sensitive_stage_captures_verbatim() {
            let mut def = stage(LengthRule::Exact { length: 4 });
            def.sensitive = false;
            assert_eq!(capture_for_audit(&def, "1234"), "1234");
            def.sensitive = true;
            assert_eq!(capture_for_audit(&def, "1234"), "**34");
        }

        proptest! {
            /// Masked output has the same length, a fully-masked prefix, and
            /// a visible suffix of at most 2 matching the input.
            #[test]
            fn masking_shape(digits in "[0-9]{0,20}") {
                let masked = mask_digits(&digits);
                let len = digits.chars().count();
                prop_assert_eq!(masked.chars().count(), len);

                if len <= 2 {
                    prop_assert!(masked.chars().all(|c| c == MASK_CHAR));
                } else {
                    let visible = len.div_ceil(3).clamp(1, 2);
                    let hidden = len - visible;
                    prop_assert!(masked.chars().take(hidden).all(|c| c == MASK_CHAR));
                    prop_assert_eq!(
                        masked.chars().skip(hidden).collect::<String>(),
                        digits.chars().skip(hidden).collect::<String>()
                    );
                }
            }
        }
    }

    #[test]
    fn definition_serde_defaults() {
        let json = serde_json::json!({
            "key": "pin",
            "label": "PIN",
            "length": {"kind": "exact", "length": 4},
            "prompt": "Enter your PIN"
        });
        let def: StageDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(def.max_attempts, 3);
        assert!(def.sensitive);
        assert!(def.rule.is_none());
        assert!(def.expected.is_none());
    }
}
