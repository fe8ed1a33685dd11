//! Intent classification through one small auxiliary model call.

use blv_config::AppConfig;
use blv_core::provider::{Provider, ProviderRequest};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::intent::Intent;

pub const DEFAULT_CLASSIFIER_MAX_TOKENS: u32 = 10;

/// Maps a raw user message to an [`Intent`].
///
/// Never fails: transport errors and unknown labels fall back to
/// [`Intent::Chat`]. Nothing is persisted.
pub struct IntentClassifier {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: u32,
}

impl IntentClassifier {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: DEFAULT_CLASSIFIER_MAX_TOKENS,
        }
    }

    /// Uses the fast model tier.
    pub fn from_config(provider: Arc<dyn Provider>, config: &AppConfig) -> Self {
        Self::new(provider, config.models.fast.clone())
            .with_max_tokens(config.routing.classifier_max_tokens)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub async fn classify(&self, message: &str) -> Intent {
        let request = ProviderRequest::simple(&self.model, classifier_prompt(message), self.max_tokens)
            .with_temperature(0.0);

        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "Intent classifier failed, using CHAT");
                return Intent::Chat;
            }
        };

        match response.text.parse::<Intent>() {
            Ok(intent) => {
                debug!(intent = %intent, "Intent classified");
                intent
            }
            Err(label) => {
                warn!(label = %label, "Unrecognized intent label, using CHAT");
                Intent::Chat
            }
        }
    }
}

fn classifier_prompt(message: &str) -> String {
    format!(
        "Classify this message into ONE category:\n\
         - SAVE: the user reports the result of a test they ran (e.g. \"I tested X\", \"it works\", \"vulnerable\", \"blocked\")\n\
         - IDEA: the user asks for a suggestion or idea (e.g. \"bypass idea\", \"what should I test\", \"suggest\")\n\
         - MEMORY: the user asks about stored information (e.g. \"what do you have in memory\", \"show events\", \"list\")\n\
         - CHAT: anything else (questions, discussion, explanations)\n\
         \n\
         Message: \"{message}\"\n\
         \n\
         Answer ONLY with: SAVE, IDEA, MEMORY or CHAT"
    )
}
