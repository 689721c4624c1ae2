//! Filter → rank → bind: the resolution algorithm.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::context::ExecContext;
use crate::error::EngineError;
use crate::llm::{
    ChatClient, EmbedClient, OpenAiChatClient, OpenAiEmbedClient, OpenAiPromptClient,
    PromptClient, StreamClient,
};

use super::{Capability, Provider, ProviderCatalogue, ResolveRequest};

/// Constructs capability clients for a bound `(provider, backend)` pair.
///
/// The default [`OpenAiClientFactory`] speaks the OpenAI-compatible wire
/// protocol; tests plug in mock factories.
pub trait ClientFactory: Send + Sync {
    fn chat_client(&self, provider: &Provider, backend_url: &Url) -> Arc<dyn ChatClient>;
    fn prompt_client(&self, provider: &Provider, backend_url: &Url) -> Arc<dyn PromptClient>;
    fn embed_client(&self, provider: &Provider, backend_url: &Url) -> Arc<dyn EmbedClient>;
    fn stream_client(&self, provider: &Provider, backend_url: &Url) -> Arc<dyn StreamClient>;
}

/// Factory for OpenAI-compatible backends (openai, vllm, ollama-compat).
#[derive(Default)]
pub struct OpenAiClientFactory;

impl ClientFactory for OpenAiClientFactory {
    fn chat_client(&self, provider: &Provider, backend_url: &Url) -> Arc<dyn ChatClient> {
        Arc::new(OpenAiChatClient::new(
            backend_url.as_str(),
            provider.name.clone(),
            provider.api_key.as_deref(),
        ))
    }

    fn prompt_client(&self, provider: &Provider, backend_url: &Url) -> Arc<dyn PromptClient> {
        Arc::new(OpenAiPromptClient::new(
            backend_url.as_str(),
            provider.name.clone(),
            provider.api_key.as_deref(),
        ))
    }

    fn embed_client(&self, provider: &Provider, backend_url: &Url) -> Arc<dyn EmbedClient> {
        Arc::new(OpenAiEmbedClient::new(
            backend_url.as_str(),
            provider.name.clone(),
            provider.api_key.as_deref(),
        ))
    }

    fn stream_client(&self, provider: &Provider, backend_url: &Url) -> Arc<dyn StreamClient> {
        Arc::new(OpenAiChatClient::new(
            backend_url.as_str(),
            provider.name.clone(),
            provider.api_key.as_deref(),
        ))
    }
}

/// A resolved binding: the client plus the provider and backend it came from.
pub struct Resolved<T> {
    pub client: T,
    pub provider: Provider,
    pub backend_url: Url,
}

impl<T> std::fmt::Debug for Resolved<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("provider", &self.provider)
            .field("backend_url", &self.backend_url)
            .finish_non_exhaustive()
    }
}

/// Resolver over a shared catalogue.
pub struct ModelResolver {
    catalogue: Arc<ProviderCatalogue>,
    factory: Arc<dyn ClientFactory>,
}

impl ModelResolver {
    pub fn new(catalogue: Arc<ProviderCatalogue>) -> Self {
        Self {
            catalogue,
            factory: Arc::new(OpenAiClientFactory),
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Resolves a chat client.
    pub fn resolve_chat(
        &self,
        ctx: &ExecContext,
        request: &ResolveRequest,
    ) -> Result<Resolved<Arc<dyn ChatClient>>, EngineError> {
        let (provider, backend) = self.bind(ctx, request, Capability::Chat)?;
        let client = self.factory.chat_client(&provider, &backend);
        Ok(Resolved {
            client,
            provider,
            backend_url: backend,
        })
    }

    /// Resolves a prompt-execution client.
    pub fn resolve_prompt(
        &self,
        ctx: &ExecContext,
        request: &ResolveRequest,
    ) -> Result<Resolved<Arc<dyn PromptClient>>, EngineError> {
        let (provider, backend) = self.bind(ctx, request, Capability::Prompt)?;
        let client = self.factory.prompt_client(&provider, &backend);
        Ok(Resolved {
            client,
            provider,
            backend_url: backend,
        })
    }

    /// Resolves an embedding client.
    pub fn resolve_embed(
        &self,
        ctx: &ExecContext,
        request: &ResolveRequest,
    ) -> Result<Resolved<Arc<dyn EmbedClient>>, EngineError> {
        let (provider, backend) = self.bind(ctx, request, Capability::Embed)?;
        let client = self.factory.embed_client(&provider, &backend);
        Ok(Resolved {
            client,
            provider,
            backend_url: backend,
        })
    }

    /// Resolves a streaming chat client.
    pub fn resolve_stream(
        &self,
        ctx: &ExecContext,
        request: &ResolveRequest,
    ) -> Result<Resolved<Arc<dyn StreamClient>>, EngineError> {
        let (provider, backend) = self.bind(ctx, request, Capability::Stream)?;
        let client = self.factory.stream_client(&provider, &backend);
        Ok(Resolved {
            client,
            provider,
            backend_url: backend,
        })
    }

    fn bind(
        &self,
        ctx: &ExecContext,
        request: &ResolveRequest,
        capability: Capability,
    ) -> Result<(Provider, Url), EngineError> {
        let snapshot = self.catalogue.snapshot();
        let candidates: Vec<&Provider> = snapshot
            .iter()
            .filter(|p| {
                (request.provider_types.is_empty()
                    || request.provider_types.contains(&p.provider_type))
                    && p.context_length >= request.context_length
                    && p.supports(capability)
            })
            .collect();
        if candidates.is_empty() {
            return Err(EngineError::NoProvider(format!(
                "capability {capability}, types {:?}, min context {}",
                request.provider_types, request.context_length
            )));
        }

        // Exact-name preference in request order, then any remaining
        // candidate in catalogue order.
        let chosen = request
            .model_names
            .iter()
            .find_map(|name| candidates.iter().find(|p| &p.name == name))
            .copied()
            .unwrap_or(candidates[0]);

        let backend = validated_backend(chosen)?;
        debug!(
            request_id = %ctx.request_id,
            provider = %chosen.id,
            model = %chosen.name,
            backend = %backend,
            capability = %capability,
            "model resolved"
        );
        if let Some(tracker) = &request.tracker {
            tracker.on_selected(chosen, backend.as_str());
        }
        Ok((chosen.clone(), backend))
    }
}

/// First backend ID that is a usable http(s) URL.
fn validated_backend(provider: &Provider) -> Result<Url, EngineError> {
    let mut last_err = None;
    for raw in &provider.backend_ids {
        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
                return Ok(url)
            }
            Ok(url) => {
                last_err = Some(EngineError::BadBackendUrl {
                    url: raw.clone(),
                    reason: format!("unsupported scheme {:?} or missing host", url.scheme()),
                });
            }
            Err(e) => {
                last_err = Some(EngineError::BadBackendUrl {
                    url: raw.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Err(last_err.unwrap_or_else(|| EngineError::BadBackendUrl {
        url: String::new(),
        reason: format!("provider {} has no backend ids", provider.id),
    }))
}
