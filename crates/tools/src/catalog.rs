//! Tool schemas advertised to the model.

use blv_core::tool::{ToolDefinition, ToolKind};
use serde_json::json;

pub fn definition(kind: ToolKind) -> ToolDefinition {
    let (description, parameters) = match kind {
        ToolKind::SaveEvent => (
            "Save the result of a business-logic test (duplicates are skipped automatically).\n\
             \n\
             Use ONLY when the user's CURRENT message describes a test they ran and states \
             its outcome (it worked, it was blocked, it was refused).\n\
             Never use it for ideas or questions, or for results from earlier messages. \
             Never combine it with suggest_test in one reply.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Descriptive pattern (e.g. 3DS2 PaRes replay cross-card)"},
                    "worked": {"type": "boolean", "description": "true if the bypass worked, false if it was blocked"},
                    "target": {"type": "string", "description": "Site or application name"},
                    "technique": {"type": "string", "description": "Precise technical method"},
                    "impact": {"type": "string", "description": "Security consequence (e.g. payment bypass)"},
                    "notes": {"type": "string", "description": "Context from the user and the observed result"},
                    "payload": {"type": "string", "description": "HTTP request or payload used (optional)"}
                },
                "required": ["pattern", "worked", "target", "technique", "impact"]
            }),
        ),
        ToolKind::ShowAnalysis => (
            "Display a structured analysis panel. Required for any analysis longer than 50 words: \
             hypotheses, pattern analysis, technical explanations.",
            json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "Short title"},
                    "pattern": {"type": "string", "description": "Pattern being analysed"},
                    "target": {"type": "string", "description": "Target site or API"},
                    "hypothesis": {"type": "string", "description": "Technical hypothesis"},
                    "tests": {"type": "array", "items": {"type": "string"}, "description": "Tests to run (3-5)"},
                    "impact": {"type": "string", "description": "Impact if vulnerable"},
                    "confidence": {"type": "string", "enum": ["LOW", "MEDIUM", "HIGH"], "description": "Confidence level"}
                },
                "required": ["title", "pattern", "hypothesis", "tests"]
            }),
        ),
        ToolKind::SuggestTest => (
            "Suggest one precise test with steps.\n\
             \n\
             Use when the user asks for an idea or the next logical step. \
             Never use it when the user reports a result. Never combine it with save_event.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Pattern to test"},
                    "target": {"type": "string", "description": "Target"},
                    "steps": {"type": "array", "items": {"type": "string"}, "description": "Precise steps (3-5)"},
                    "variables": {"type": "array", "items": {"type": "string"}, "description": "Critical variables to tamper with"},
                    "expected": {"type": "string", "description": "Expected result if vulnerable"}
                },
                "required": ["pattern", "steps", "expected"]
            }),
        ),
        ToolKind::AskClarification => (
            "Ask for clarification when the input is ambiguous, unintelligible or missing critical \
             context. Do not use it when the message is clear, even if short.",
            json!({
                "type": "object",
                "properties": {
                    "question": {"type": "string", "description": "One clear question (max 20 words)"}
                },
                "required": ["question"]
            }),
        ),
    };

    ToolDefinition {
        name: kind.name().to_string(),
        description: description.to_string(),
        parameters,
    }
}

/// Definitions for `kinds`, in the order given.
pub fn definitions(kinds: &[ToolKind]) -> Vec<ToolDefinition> {
    kinds.iter().copied().map(definition).collect()
}

/// The whole registry.
pub fn catalog() -> Vec<ToolDefinition> {
    definitions(&ToolKind::ALL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_has_an_object_schema() {
        for def in catalog() {
            assert_eq!(def.parameters["type"], "object", "{}", def.name);
            assert!(def.parameters["required"].is_array());
            assert!(ToolKind::from_name(&def.name).is_some());
        }
    }

    #[test]
    fn save_event_schema_fields() {
        let def = definition(ToolKind::SaveEvent);
        let required: Vec<&str> = def.parameters["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(required, vec!["pattern", "worked", "target", "technique", "impact"]);
        assert!(def.parameters["properties"]["payload"].is_object());
    }

    #[test]
    fn definitions_keep_order() {
        let defs = definitions(&[ToolKind::SuggestTest, ToolKind::SaveEvent]);
        let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["suggest_test", "save_event"]);
    }
}
