//! Intent routing: classify a turn, then pick its execution parameters.
//!
//! [`IntentClassifier`] makes one small model call per turn.
//! [`RoutingPolicy`] is a pure table lookup. [`Router`] composes them and
//! honours the routing on/off switch.

pub mod classifier;
pub mod intent;
pub mod policy;

pub use classifier::IntentClassifier;
pub use intent::Intent;
pub use policy::{ContextDetail, ModelTier, RoutingConfig, RoutingPolicy};

use blv_config::AppConfig;
use blv_core::provider::Provider;
use std::sync::Arc;

/// Classifier plus policy. Without a classifier every turn is unrouted.
pub struct Router {
    classifier: Option<IntentClassifier>,
    policy: RoutingPolicy,
}

impl Router {
    pub fn new(classifier: IntentClassifier, policy: RoutingPolicy) -> Self {
        Self {
            classifier: Some(classifier),
            policy,
        }
    }

    pub fn unrouted(policy: RoutingPolicy) -> Self {
        Self {
            classifier: None,
            policy,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &AppConfig) -> Self {
        let policy = RoutingPolicy::from_config(config);
        if config.routing.enabled {
            Self::new(IntentClassifier::from_config(provider, config), policy)
        } else {
            Self::unrouted(policy)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    pub async fn route(&self, message: &str) -> RoutingConfig {
        match &self.classifier {
            Some(classifier) => self.policy.resolve(classifier.classify(message).await),
            None => self.policy.unrouted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blv_config::ModelsConfig;
    use blv_core::tool::ToolKind;
    use blv_providers::mock::ScriptedProvider;

    #[tokio::test]
    async fn routed_turn_uses_classifier() {
        let provider = Arc::new(ScriptedProvider::new().with_completion("SAVE"));
        let router = Router::new(
            IntentClassifier::new(provider.clone(), "fast"),
            RoutingPolicy::new(ModelsConfig::default()),
        );

        let config = router.route("I tested it, blocked").await;
        assert_eq!(config.intent, Some(Intent::Save));
        assert_eq!(config.context_detail, ContextDetail::Minimal);
        assert!(!config.permits(ToolKind::SuggestTest));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn disabled_routing_skips_classifier() {
        let provider = Arc::new(ScriptedProvider::new());
        let mut config = AppConfig::default();
        config.routing.enabled = false;
        let router = Router::from_config(provider.clone(), &config);

        assert!(!router.is_enabled());
        let routed = router.route("hello").await;
        assert_eq!(routed.intent, None);
        assert_eq!(routed.max_output_tokens, config.default_max_tokens);
        assert_eq!(provider.call_count(), 0);
    }
}
