use super::registry::ModelSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

/// Picks the model for one provider: an explicit request must exist, a
/// configured model falls back to the provider default when stale.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    models: Vec<ModelSpec>,
}

impl ModelSelector {
    pub fn new(models: Vec<ModelSpec>) -> Self {
        Self { models }
    }

    fn find(&self, id: &str) -> Option<&ModelSpec> {
        let id = id.trim();
        self.models.iter().find(|model| model.id == id)
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        configured: Option<&str>,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        if let Some(requested_value) = requested {
            return self
                .find(requested_value)
                .map(|model| ModelSelection {
                    model: model.clone(),
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                })
                .ok_or_else(|| format!("Unknown model '{requested_value}'."));
        }

        let configured = configured.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = match configured {
            Some(configured_value) => {
                if let Some(model) = self.find(configured_value) {
                    return Ok(ModelSelection {
                        model: model.clone(),
                        requested: None,
                        fallback_reason: None,
                    });
                }
                format!("Configured model '{configured_value}' unavailable; using default.")
            }
            None => "No model specified; using default.".to_string(),
        };

        let Some(model) = self.models.first().cloned() else {
            return Err("No models available.".to_string());
        };
        Ok(ModelSelection {
            model,
            requested: None,
            fallback_reason: Some(fallback_reason),
        })
    }
}
