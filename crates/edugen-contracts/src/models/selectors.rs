use super::registry::{ModelRegistry, ModelSpec, ModelTier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(model) = self.registry.ensure(requested_value, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested model '{requested_value}' unavailable for capability '{capability}'."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some("No model specified; using default.".to_string()), None)
        };

        let candidates = self.registry.by_capability(capability);
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}

/// Model name per requested image slot.
///
/// Flash is the default. When both tiers are selected the first half of the
/// slots (rounded up) goes to flash for up to four images; larger batches
/// alternate starting with flash.
pub fn distribute_models(selected: &[ModelTier], count: usize) -> Vec<String> {
    let flash = selected.contains(&ModelTier::Flash);
    let pro = selected.contains(&ModelTier::Pro);

    let tiers: Vec<ModelTier> = match (flash, pro) {
        (false, true) => vec![ModelTier::Pro; count],
        (true, true) => match count {
            1 => vec![ModelTier::Flash],
            2 => vec![ModelTier::Flash, ModelTier::Pro],
            3 => vec![ModelTier::Flash, ModelTier::Flash, ModelTier::Pro],
            4 => vec![
                ModelTier::Flash,
                ModelTier::Flash,
                ModelTier::Pro,
                ModelTier::Pro,
            ],
            _ => (0..count)
                .map(|idx| {
                    if idx % 2 == 0 {
                        ModelTier::Flash
                    } else {
                        ModelTier::Pro
                    }
                })
                .collect(),
        },
        _ => vec![ModelTier::Flash; count],
    };
    tiers
        .into_iter()
        .map(|tier| tier.model_name().to_string())
        .collect()
}
