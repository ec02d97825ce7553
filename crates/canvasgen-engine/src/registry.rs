use std::sync::Arc;

use canvasgen_contracts::config::CredentialStore;
use canvasgen_contracts::models::{ModelSelection, ModelSelector};
use canvasgen_contracts::providers::{ProviderDescriptor, ProviderRegistry, ProviderSummary};

use crate::adapter::ProviderAdapter;

/// One adapter per provider id. Built once, then only read.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: ProviderRegistry<Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A>(&mut self, adapter: A)
    where
        A: ProviderAdapter + 'static,
    {
        self.register_shared(Arc::new(adapter));
    }

    /// Last registration wins; a duplicate id is logged as misconfiguration.
    pub fn register_shared(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let id = adapter.id().to_string();
        if let Some(previous) = self.adapters.register(id.clone(), adapter) {
            tracing::warn!(
                provider = %id,
                replaced = %previous.name(),
                "provider registered twice; keeping the latest adapter"
            );
        }
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider_id.trim()).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.adapters.list()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.adapters
            .providers()
            .map(|adapter| adapter.descriptor())
            .collect()
    }

    /// Providers usable right now: credential configured, or none needed.
    pub fn configured_providers(&self, credentials: &dyn CredentialStore) -> Vec<ProviderSummary> {
        self.adapters
            .providers()
            .filter(|adapter| has_credential(adapter.as_ref(), credentials))
            .map(|adapter| adapter.descriptor().summary())
            .collect()
    }

    /// Model the provider would use when the caller does not name one.
    pub fn current_model(
        &self,
        provider_id: &str,
        credentials: &dyn CredentialStore,
    ) -> Option<ModelSelection> {
        let adapter = self.get(provider_id)?;
        let configured = credentials.selected_model(adapter.id());
        ModelSelector::new(adapter.models().to_vec())
            .select(None, configured.as_deref())
            .ok()
    }

    pub fn supports_image_to_image(
        &self,
        provider_id: &str,
        credentials: &dyn CredentialStore,
    ) -> bool {
        let Some(adapter) = self.get(provider_id) else {
            return false;
        };
        if !has_credential(adapter.as_ref(), credentials) {
            return false;
        }
        self.current_model(provider_id, credentials)
            .is_some_and(|selection| adapter.supports_image_to_image(&selection.model.id))
    }

    pub fn image_to_image_providers(&self, credentials: &dyn CredentialStore) -> Vec<String> {
        self.adapters
            .providers()
            .map(|adapter| adapter.id().to_string())
            .filter(|id| self.supports_image_to_image(id, credentials))
            .collect()
    }
}

pub(crate) fn has_credential(adapter: &dyn ProviderAdapter, credentials: &dyn CredentialStore) -> bool {
    !adapter.requires_credential() || credentials.api_key(adapter.id()).is_some()
}
