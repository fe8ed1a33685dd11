//! Flow mapping over captured HTTP traffic.
//!
//! One deep-tier completion with a strict JSON output contract. The result is
//! whatever JSON object the model produced; failures come back as an
//! `{"error": ...}` value instead of an `Err`, so callers can show or store it
//! as-is.

use blv_core::knowledge::HttpRequestRecord;
use blv_core::message::Message;
use blv_core::provider::{Provider, ProviderRequest};
use blv_core::tool::ToolChoice;
use blv_router::{RoutingConfig, RoutingPolicy};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

const BODY_PREVIEW: usize = 500;
const HEADERS_PREVIEW: usize = 300;

const FLOW_CONTRACT: &str = r#"You are an application security expert specialised in business logic vulnerabilities (BLV).

Analyse these HTTP requests and produce a STRUCTURED MAP of the flow.

# OUTPUT FORMAT (strict JSON)
{
    "site": "site name",
    "flow_type": "payment|auth|order|transfer|other",
    "endpoints": [
        {
            "url": "...",
            "method": "...",
            "role": "initiate|validate|finalize|callback",
            "sensitive_params": ["param1", "param2"],
            "dynamic_ids": ["orderId", "sessionId"]
        }
    ],
    "relations": [
        {
            "from": "endpoint1",
            "to": "endpoint2",
            "type": "sequential|conditional|callback",
            "shared_params": ["param"]
        }
    ],
    "trust_boundaries": [
        {
            "location": "between X and Y",
            "risk": "risk description"
        }
    ],
    "attack_surface": [
        {
            "pattern": "PATTERN_NAME",
            "target_endpoint": "url",
            "target_param": "param",
            "hypothesis": "If X then Y",
            "confidence": "HIGH|MEDIUM|LOW",
            "priority": 1
        }
    ]
}
"#;

pub struct FlowAnalyzer {
    provider: Arc<dyn Provider>,
    config: RoutingConfig,
}

impl FlowAnalyzer {
    pub fn new(provider: Arc<dyn Provider>, policy: &RoutingPolicy) -> Self {
        Self {
            provider,
            config: policy.analysis(),
        }
    }

    pub fn prompt(requests: &[HttpRequestRecord], existing: Option<&Value>) -> String {
        let mut prompt = String::from(FLOW_CONTRACT);

        if let Some(map) = existing {
            let pretty = serde_json::to_string_pretty(map).unwrap_or_else(|_| map.to_string());
            prompt.push_str(&format!("\n# EXISTING MAP (extend it)\n{pretty}\n"));
        }

        prompt.push_str("\n# REQUESTS TO ANALYSE\n");
        for request in requests {
            let method = if request.method.is_empty() { "GET" } else { &request.method };
            prompt.push_str(&format!("## {method} {}\n", request.url));
            if !request.body.is_empty() {
                prompt.push_str(&format!("Body: {}\n", preview(&request.body, BODY_PREVIEW)));
            }
            if !request.headers.is_empty() {
                prompt.push_str(&format!(
                    "Headers: {}\n",
                    preview(&request.headers, HEADERS_PREVIEW)
                ));
            }
            prompt.push('\n');
        }
        prompt
    }

    pub async fn analyze(&self, requests: &[HttpRequestRecord], existing: Option<&Value>) -> Value {
        let request = ProviderRequest {
            model: self.config.model_id.clone(),
            system: Vec::new(),
            messages: vec![Message::user(Self::prompt(requests, existing))],
            temperature: self.config.request_temperature(),
            max_tokens: self.config.max_output_tokens,
            tools: Vec::new(),
            tool_choice: ToolChoice::None,
            thinking_budget: self
                .config
                .reasoning_enabled()
                .then_some(self.config.reasoning_budget),
        };

        info!(
            model = %request.model,
            requests = requests.len(),
            incremental = existing.is_some(),
            "Analysing flow"
        );

        match self.provider.complete(request).await {
            Ok(response) => extract_map(&response.text),
            Err(e) => {
                warn!(error = %e, "Flow analysis failed");
                json!({ "error": e.to_string() })
            }
        }
    }
}

/// The outermost `{ ... }` span of `text`, parsed.
pub fn extract_map(text: &str) -> Value {
    let span = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return json!({ "error": "No JSON in response", "raw": text }),
    };
    match serde_json::from_str::<Value>(span) {
        Ok(map) => map,
        Err(e) => json!({ "error": format!("Invalid JSON in response: {e}"), "raw": text }),
    }
}

fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}
