use serde::Serialize;

/// A model id together with the Triton base address serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBackend {
    pub model_id: String,
    pub base_address: String,
}

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelCard>,
}

#[derive(Debug, Serialize)]
pub struct ModelCard {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: String,
}

/// Fixed model table, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    endpoints: Vec<ResolvedBackend>,
    owner: String,
}

impl ModelRegistry {
    pub fn new(endpoints: Vec<ResolvedBackend>, owner: impl Into<String>) -> Self {
        Self {
            endpoints,
            owner: owner.into(),
        }
    }

    pub fn resolve(&self, model_id: &str) -> Option<&ResolvedBackend> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.model_id == model_id)
    }

    pub fn model_ids(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|endpoint| endpoint.model_id.as_str())
    }

    pub fn list(&self, created: i64) -> ModelList {
        ModelList {
            object: "list",
            data: self
                .model_ids()
                .map(|id| ModelCard {
                    id: id.to_owned(),
                    object: "model",
                    created,
                    owned_by: self.owner.clone(),
                })
                .collect(),
        }
    }
}
