//! Model resolver: pick one provider/backend per request and hand back a
//! capability-specific client.
//!
//! The live catalogue is maintained elsewhere (runtime-state reconciliation);
//! readers always see a consistent snapshot. The resolver never caches
//! clients — a client lives for one task execution.

mod catalogue;
mod resolve;

pub use catalogue::ProviderCatalogue;
pub use resolve::{ClientFactory, ModelResolver, OpenAiClientFactory, Resolved};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A capability a request may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Chat,
    Prompt,
    Embed,
    Stream,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::Prompt => "prompt",
            Capability::Embed => "embed",
            Capability::Stream => "stream",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend-reachable model with capability flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    /// Model name (e.g. `"llama3:8b"`).
    pub name: String,
    /// Provider type (e.g. `"ollama"`, `"openai"`, `"vllm"`).
    pub provider_type: String,
    pub context_length: u32,
    #[serde(default)]
    pub can_chat: bool,
    #[serde(default)]
    pub can_prompt: bool,
    #[serde(default)]
    pub can_embed: bool,
    #[serde(default)]
    pub can_stream: bool,
    /// Candidate backend base URLs serving this model.
    pub backend_ids: Vec<String>,
    /// API key injected when the backend requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Provider {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Chat => self.can_chat,
            Capability::Prompt => self.can_prompt,
            Capability::Embed => self.can_embed,
            Capability::Stream => self.can_stream,
        }
    }
}

/// Observer for resolution decisions; requests may carry one for telemetry.
pub trait ResolutionTracker: Send + Sync {
    fn on_selected(&self, provider: &Provider, backend: &str);
}

/// A resolution request: filters plus ranked model preferences.
#[derive(Clone, Default)]
pub struct ResolveRequest {
    /// Acceptable provider types; empty means any.
    pub provider_types: Vec<String>,
    /// Model names in preference order; exact matches rank first.
    pub model_names: Vec<String>,
    /// Minimum context length.
    pub context_length: u32,
    pub tracker: Option<Arc<dyn ResolutionTracker>>,
}

impl std::fmt::Debug for ResolveRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveRequest")
            .field("provider_types", &self.provider_types)
            .field("model_names", &self.model_names)
            .field("context_length", &self.context_length)
            .field("tracker", &self.tracker.is_some())
            .finish()
    }
}
