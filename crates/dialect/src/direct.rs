//! Direct-route payload edits
//!
//! The direct routes forward bodies untouched except for two edits driven
//! by per-model configuration: a system/instructions prefix and a
//! reasoning-effort directive. The directive has three modes: `auto`
//! leaves the caller's field alone, a named level injects a structured
//! directive, and `off` (or anything unrecognized) strips whatever the
//! caller supplied.

use serde::Deserialize;
use serde_json::{json, Value};

/// Reasoning-effort setting from per-model configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReasoningLevel {
    Auto,
    Low,
    Medium,
    High,
    #[default]
    Off,
}

impl ReasoningLevel {
    /// Parse a configured value; absent or unrecognized means `Off`.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("auto") => Self::Auto,
            Some("low") => Self::Low,
            Some("medium") => Self::Medium,
            Some("high") => Self::High,
            _ => Self::Off,
        }
    }

    fn effort(self) -> Option<&'static str> {
        match self {
            Self::Low => Some("low"),
            Self::Medium => Some("medium"),
            Self::High => Some("high"),
            Self::Auto | Self::Off => None,
        }
    }

    /// Thinking token budget for backends that take numbers instead of
    /// effort names.
    fn budget_tokens(self) -> Option<u32> {
        match self {
            Self::Low => Some(4096),
            Self::Medium => Some(12288),
            Self::High => Some(24576),
            Self::Auto | Self::Off => None,
        }
    }
}

impl<'de> Deserialize<'de> for ReasoningLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(Some(&value)))
    }
}

/// Prepend the configured system prompt to a responses-protocol
/// `instructions` string.
pub fn inject_instructions(body: &mut Value, prompt: &str) {
    if prompt.is_empty() {
        return;
    }
    let instructions = match body.get("instructions").and_then(Value::as_str) {
        Some(existing) => format!("{prompt}{existing}"),
        None => prompt.to_string(),
    };
    body["instructions"] = json!(instructions);
}

/// Prepend the configured system prompt as a text block in a
/// messages-protocol `system` array.
pub fn inject_system_prompt(body: &mut Value, prompt: &str) {
    if prompt.is_empty() {
        return;
    }
    let block = json!({"type": "text", "text": prompt});
    let system = match body.get("system") {
        Some(Value::Array(existing)) => {
            let mut blocks = vec![block];
            blocks.extend(existing.iter().cloned());
            Value::Array(blocks)
        }
        Some(Value::String(existing)) => {
            json!([block, {"type": "text", "text": existing}])
        }
        _ => json!([block]),
    };
    body["system"] = system;
}

/// Apply the reasoning directive for the responses protocol
/// (`reasoning: {effort, summary}`).
pub fn apply_reasoning_effort(body: &mut Value, level: ReasoningLevel) {
    match level {
        ReasoningLevel::Auto => {}
        ReasoningLevel::Off => {
            if let Some(obj) = body.as_object_mut() {
                obj.remove("reasoning");
            }
        }
        _ => {
            body["reasoning"] = json!({
                "effort": level.effort().expect("named level has an effort"),
                "summary": "auto",
            });
        }
    }
}

/// Apply the reasoning directive for the messages protocol
/// (`thinking: {type, budget_tokens}`).
pub fn apply_thinking_budget(body: &mut Value, level: ReasoningLevel) {
    match level {
        ReasoningLevel::Auto => {}
        ReasoningLevel::Off => {
            if let Some(obj) = body.as_object_mut() {
                obj.remove("thinking");
            }
        }
        _ => {
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": level.budget_tokens().expect("named level has a budget"),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recognizes_all_levels() {
        assert_eq!(ReasoningLevel::parse(Some("auto")), ReasoningLevel::Auto);
        assert_eq!(ReasoningLevel::parse(Some("low")), ReasoningLevel::Low);
        assert_eq!(ReasoningLevel::parse(Some("medium")), ReasoningLevel::Medium);
        assert_eq!(ReasoningLevel::parse(Some("high")), ReasoningLevel::High);
        assert_eq!(ReasoningLevel::parse(Some("off")), ReasoningLevel::Off);
        assert_eq!(ReasoningLevel::parse(Some("frantic")), ReasoningLevel::Off);
        assert_eq!(ReasoningLevel::parse(None), ReasoningLevel::Off);
    }

    #[test]
    fn instructions_prefix_prepends_to_existing() {
        let mut body = json!({"instructions": "be brief"});
        inject_instructions(&mut body, "SYSTEM. ");
        assert_eq!(body["instructions"], "SYSTEM. be brief");
    }

    #[test]
    fn instructions_set_when_absent() {
        let mut body = json!({"model": "m"});
        inject_instructions(&mut body, "SYSTEM.");
        assert_eq!(body["instructions"], "SYSTEM.");
    }

    #[test]
    fn empty_prompt_changes_nothing() {
        let mut body = json!({"model": "m"});
        inject_instructions(&mut body, "");
        inject_system_prompt(&mut body, "");
        assert_eq!(body, json!({"model": "m"}));
    }

    #[test]
    fn system_block_prepends_to_existing_array() {
        let mut body = json!({"system": [{"type": "text", "text": "user prompt"}]});
        inject_system_prompt(&mut body, "SYSTEM.");
        let system = body["system"].as_array().unwrap();
        assert_eq!(system.len(), 2);
        assert_eq!(system[0]["text"], "SYSTEM.");
        assert_eq!(system[1]["text"], "user prompt");
    }

    #[test]
    fn string_system_is_preserved_as_a_block() {
        let mut body = json!({"system": "user prompt"});
        inject_system_prompt(&mut body, "SYSTEM.");
        let system = body["system"].as_array().unwrap();
        assert_eq!(system[0]["text"], "SYSTEM.");
        assert_eq!(system[1]["text"], "user prompt");
    }

    #[test]
    fn reasoning_effort_injects_named_level() {
        let mut body = json!({"model": "m"});
        apply_reasoning_effort(&mut body, ReasoningLevel::Medium);
        assert_eq!(
            body["reasoning"],
            json!({"effort": "medium", "summary": "auto"})
        );
    }

    #[test]
    fn reasoning_auto_leaves_callers_field_untouched() {
        let mut body = json!({"reasoning": {"effort": "high"}});
        apply_reasoning_effort(&mut body, ReasoningLevel::Auto);
        assert_eq!(body["reasoning"], json!({"effort": "high"}));

        let mut bare = json!({"model": "m"});
        apply_reasoning_effort(&mut bare, ReasoningLevel::Auto);
        assert!(bare.get("reasoning").is_none());
    }

    #[test]
    fn reasoning_off_strips_callers_field() {
        let mut body = json!({"reasoning": {"effort": "high"}});
        apply_reasoning_effort(&mut body, ReasoningLevel::Off);
        assert!(body.get("reasoning").is_none());
    }

    #[test]
    fn thinking_budgets_map_named_levels_to_numbers() {
        for (level, budget) in [
            (ReasoningLevel::Low, 4096),
            (ReasoningLevel::Medium, 12288),
            (ReasoningLevel::High, 24576),
        ] {
            let mut body = json!({"model": "m"});
            apply_thinking_budget(&mut body, level);
            assert_eq!(
                body["thinking"],
                json!({"type": "enabled", "budget_tokens": budget})
            );
        }
    }

    #[test]
    fn thinking_off_strips_callers_field() {
        let mut body = json!({"thinking": {"type": "enabled", "budget_tokens": 1}});
        apply_thinking_budget(&mut body, ReasoningLevel::Off);
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn thinking_auto_preserves_callers_field() {
        let mut body = json!({"thinking": {"type": "enabled", "budget_tokens": 999}});
        apply_thinking_budget(&mut body, ReasoningLevel::Auto);
        assert_eq!(body["thinking"]["budget_tokens"], 999);
    }
}
