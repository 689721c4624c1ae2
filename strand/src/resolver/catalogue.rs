//! Provider catalogue with snapshot reads.
//!
//! Readers take an `Arc` snapshot; the reconciler swaps the whole list in
//! one write. Catalogue order is meaningful: ties in ranking are broken by
//! insertion order.

use std::sync::{Arc, RwLock};

use super::Provider;

/// Read-mostly provider catalogue.
#[derive(Default)]
pub struct ProviderCatalogue {
    providers: RwLock<Arc<Vec<Provider>>>,
}

impl ProviderCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_providers(providers: Vec<Provider>) -> Self {
        Self {
            providers: RwLock::new(Arc::new(providers)),
        }
    }

    /// Current snapshot; stays valid while held even across a replace.
    pub fn snapshot(&self) -> Arc<Vec<Provider>> {
        self.providers
            .read()
            .expect("catalogue lock poisoned")
            .clone()
    }

    /// Swaps in a new provider list (reconciliation writes).
    pub fn replace(&self, providers: Vec<Provider>) {
        *self.providers.write().expect("catalogue lock poisoned") = Arc::new(providers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(id: &str) -> Provider {
        Provider {
            id: id.into(),
            name: "m".into(),
            provider_type: "ollama".into(),
            context_length: 4096,
            can_chat: true,
            can_prompt: true,
            can_embed: false,
            can_stream: false,
            backend_ids: vec!["http://localhost:11434".into()],
            api_key: None,
        }
    }

    /// **Scenario**: A held snapshot is unaffected by a concurrent replace.
    #[test]
    fn snapshot_survives_replace() {
        let catalogue = ProviderCatalogue::with_providers(vec![provider("a")]);
        let snap = catalogue.snapshot();
        catalogue.replace(vec![provider("b"), provider("c")]);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id, "a");
        assert_eq!(catalogue.snapshot().len(), 2);
    }
}
