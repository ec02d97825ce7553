pub mod adapter;
pub mod backoff;
pub mod cancel;
pub mod media;
pub mod normalize;
pub mod orchestrator;
pub mod providers;
pub mod registry;

use std::sync::Arc;

use canvasgen_contracts::config::{CredentialStore, EnvCredentialStore};
use canvasgen_contracts::errors::GenerationError;
use canvasgen_contracts::events::EventWriter;
use canvasgen_contracts::media::MediaGateway;
use canvasgen_contracts::outcome::GenerationResult;
use canvasgen_contracts::providers::ProviderSummary;
use canvasgen_contracts::request::GenerationParams;
use uuid::Uuid;

pub use adapter::{ProviderAdapter, RawResponse, TransportError};
pub use backoff::RetryPolicy;
pub use cancel::CancellationToken;
pub use media::DirectoryMediaGateway;
pub use orchestrator::{GenerationReport, Orchestrator};
pub use registry::AdapterRegistry;

use normalize::persist_image;
use providers::{DryrunAdapter, ImagenAdapter, OpenAiAdapter, ReplicateAdapter};

pub fn default_adapter_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(DryrunAdapter::new());
    registry.register(OpenAiAdapter::new());
    registry.register(ReplicateAdapter::new());
    registry.register(ImagenAdapter::new());
    registry
}

/// Entry point for hosts: generate, list providers, list image-to-image
/// providers. Shares only read-only state between concurrent calls.
pub struct ImageGenerator {
    registry: AdapterRegistry,
    credentials: Arc<dyn CredentialStore>,
    media: Arc<dyn MediaGateway>,
    policy: RetryPolicy,
    events: Option<EventWriter>,
}

impl ImageGenerator {
    pub fn new(
        registry: AdapterRegistry,
        credentials: Arc<dyn CredentialStore>,
        media: Arc<dyn MediaGateway>,
    ) -> Self {
        Self {
            registry,
            credentials,
            media,
            policy: RetryPolicy::default(),
            events: None,
        }
    }

    /// Built-in providers, environment credentials and retry settings.
    pub fn from_env(media: Arc<dyn MediaGateway>) -> Self {
        Self::new(
            default_adapter_registry(),
            Arc::new(EnvCredentialStore::new()),
            media,
        )
        .with_policy(RetryPolicy::from_env())
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn generate(
        &self,
        prompt: &str,
        provider_id: &str,
        params: GenerationParams,
    ) -> Result<GenerationResult, GenerationError> {
        self.generate_with_cancel(prompt, provider_id, params, &CancellationToken::new())
    }

    pub fn generate_with_cancel(
        &self,
        prompt: &str,
        provider_id: &str,
        params: GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, GenerationError> {
        let generation_id = Uuid::new_v4().to_string();
        let events = self
            .events
            .as_ref()
            .map(|writer| writer.scoped(generation_id.clone()));
        let span = tracing::info_span!("generation", id = %generation_id, provider = provider_id);
        let _entered = span.enter();

        let report = Orchestrator::new(&self.registry, self.credentials.as_ref(), &self.policy)
            .with_events(events)
            .generate(prompt, provider_id, params, cancel)?;
        persist_image(
            self.media.as_ref(),
            &report.image,
            prompt.trim(),
            &report.provider_id,
            &report.model,
            report.attempts,
        )
        .map_err(|err| err.with_prediction(report.prediction_id.clone()))
    }

    pub fn list_providers(&self) -> Vec<ProviderSummary> {
        self.registry
            .configured_providers(self.credentials.as_ref())
    }

    pub fn list_image_to_image_providers(&self) -> Vec<String> {
        self.registry
            .image_to_image_providers(self.credentials.as_ref())
    }
}
