use indexmap::IndexMap;
use serde::Serialize;

use crate::models::{Capability, ModelSpec};

/// Static description of one provider, built once at registry start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub id: String,
    pub display_name: String,
    pub models: Vec<ModelSpec>,
}

impl ProviderDescriptor {
    /// `model id -> label`, in provider order.
    pub fn available_models(&self) -> IndexMap<String, String> {
        self.models
            .iter()
            .map(|model| (model.id.clone(), model.label.clone()))
            .collect()
    }

    pub fn supports_image_to_image(&self, model: &str) -> bool {
        self.models
            .iter()
            .any(|spec| spec.id == model && spec.supports(Capability::Edit))
    }

    pub fn summary(&self) -> ProviderSummary {
        ProviderSummary {
            id: self.id.clone(),
            name: self.display_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSummary {
    pub id: String,
    pub name: String,
}

/// Id-keyed provider list that keeps registration order.
#[derive(Debug, Clone)]
pub struct ProviderRegistry<T> {
    providers: Vec<(String, T)>,
}

impl<T> Default for ProviderRegistry<T> {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
        }
    }
}

impl<T> ProviderRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under `id`. A second registration under the same id
    /// replaces the first in place and hands the displaced provider back.
    pub fn register(&mut self, id: impl Into<String>, provider: T) -> Option<T> {
        let id = id.into();
        if let Some(slot) = self
            .providers
            .iter_mut()
            .find(|(existing, _)| *existing == id)
        {
            return Some(std::mem::replace(&mut slot.1, provider));
        }
        self.providers.push((id, provider));
        None
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.providers
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, provider)| provider)
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids = self
            .providers
            .iter()
            .map(|(id, _)| id.clone())
            .collect::<Vec<String>>();
        ids.sort();
        ids
    }

    pub fn providers(&self) -> impl Iterator<Item = &T> {
        self.providers.iter().map(|(_, provider)| provider)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
