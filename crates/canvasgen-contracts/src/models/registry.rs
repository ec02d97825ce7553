use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Text-to-image.
    Image,
    /// Image-to-image: source, reference or mask inputs.
    Edit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: String,
    pub label: String,
    pub provider: String,
    pub capabilities: Vec<Capability>,
}

impl ModelSpec {
    pub fn new(id: &str, label: &str, provider: &str, capabilities: &[Capability]) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            provider: provider.to_string(),
            capabilities: capabilities.to_vec(),
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Built-in models keyed by id, in declaration order.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelCatalog {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn for_provider(&self, provider: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.provider == provider)
            .cloned()
            .collect()
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    use Capability::{Edit, Image};

    let rows: [(&str, &str, &str, &[Capability]); 12] = [
        ("gpt-image-1", "GPT Image 1", "openai", &[Image, Edit]),
        ("gpt-image-1-mini", "GPT Image 1 Mini", "openai", &[Image, Edit]),
        ("dall-e-3", "DALL·E 3", "openai", &[Image]),
        ("dall-e-2", "DALL·E 2", "openai", &[Image, Edit]),
        (
            "black-forest-labs/flux-schnell",
            "FLUX.1 [schnell]",
            "replicate",
            &[Image],
        ),
        (
            "black-forest-labs/flux-1.1-pro",
            "FLUX1.1 [pro]",
            "replicate",
            &[Image],
        ),
        (
            "black-forest-labs/flux-kontext-pro",
            "FLUX.1 Kontext [pro]",
            "replicate",
            &[Image, Edit],
        ),
        ("google/nano-banana", "Nano Banana", "replicate", &[Image, Edit]),
        ("imagen-4.0-generate-001", "Imagen 4", "imagen", &[Image]),
        (
            "imagen-4.0-ultra-generate-001",
            "Imagen 4 Ultra",
            "imagen",
            &[Image],
        ),
        (
            "imagen-4.0-fast-generate-001",
            "Imagen 4 Fast",
            "imagen",
            &[Image],
        ),
        ("dryrun-image-1", "Dry run (solid colour)", "dryrun", &[Image, Edit]),
    ];

    rows.into_iter()
        .map(|(id, label, provider, capabilities)| {
            (
                id.to_string(),
                ModelSpec::new(id, label, provider, capabilities),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_models_keep_declaration_order() {
        let catalog = ModelCatalog::default();
        let ids: Vec<String> = catalog
            .for_provider("openai")
            .into_iter()
            .map(|model| model.id)
            .collect();
        assert_eq!(ids, vec!["gpt-image-1", "gpt-image-1-mini", "dall-e-3", "dall-e-2"]);
    }

    #[test]
    fn edit_capability_marks_image_to_image_models() {
        let catalog = ModelCatalog::default();
        assert!(catalog
            .get("black-forest-labs/flux-kontext-pro")
            .is_some_and(|model| model.supports(Capability::Edit)));
        assert!(catalog
            .get("dall-e-3")
            .is_some_and(|model| !model.supports(Capability::Edit)));
        assert!(catalog
            .by_capability(Capability::Edit)
            .iter()
            .all(|model| model.provider != "imagen"));
    }
}
