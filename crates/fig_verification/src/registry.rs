// Verifier Registry - Native verifiers keyed by name
//
// Built once at startup from every available verifier. Plugin verification
// definitions refer to verifiers by the name they declare.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::builtin::{Rest200OkVerifier, TcpConnectVerifier};
use crate::verifier::{Verifier, VerifierInfo};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown verifier: {0}")]
    UnknownVerifier(String),

    #[error("A verifier named {0} is already registered")]
    Duplicate(String),
}

/// Registry of all available native verifiers
#[derive(Default)]
pub struct VerifierRegistry {
    verifiers: HashMap<String, Arc<dyn Verifier>>,
}

impl VerifierRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in verifiers
    pub fn with_builtins(http_timeout: Duration) -> Self {
        let mut registry = Self::new();
        for verifier in builtin_verifiers(http_timeout) {
            // Built-in names are distinct.
            let _ = registry.register(verifier);
        }
        registry
    }

    /// Build a registry from a set of verifiers
    pub fn from_verifiers(
        verifiers: impl IntoIterator<Item = Arc<dyn Verifier>>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for verifier in verifiers {
            registry.register(verifier)?;
        }
        Ok(registry)
    }

    /// Register a verifier under its declared name
    pub fn register(&mut self, verifier: Arc<dyn Verifier>) -> Result<(), RegistryError> {
        let name = verifier.name().to_string();
        if self.verifiers.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        tracing::debug!(verifier = %name, "Registered verifier");
        self.verifiers.insert(name, verifier);
        Ok(())
    }

    /// Get a verifier by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn Verifier>, RegistryError> {
        self.verifiers
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownVerifier(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.verifiers.contains_key(name)
    }

    /// Names of all registered verifiers, sorted
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.verifiers.keys().cloned().collect();
        names.sort();
        names
    }

    /// What each registered verifier declares about itself, sorted by name
    pub fn describe(&self) -> Vec<VerifierInfo> {
        let mut infos: Vec<VerifierInfo> = self.verifiers.values().map(|v| v.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }
}

fn builtin_verifiers(http_timeout: Duration) -> Vec<Arc<dyn Verifier>> {
    vec![
        Arc::new(Rest200OkVerifier::new(http_timeout)),
        Arc::new(TcpConnectVerifier::new(http_timeout)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::{VerificationOutcome, VerifierError};
    use async_trait::async_trait;
    use fig_types::SettingValue;

    struct Always(&'static str);

    #[async_trait]
    impl Verifier for Always {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _: &[SettingValue]) -> Result<VerificationOutcome, VerifierError> {
            Ok(VerificationOutcome::passed("ok"))
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = VerifierRegistry::from_verifiers([
            Arc::new(Always("b")) as Arc<dyn Verifier>,
            Arc::new(Always("a")),
        ])
        .unwrap();

        assert_eq!(registry.list_names(), vec!["a", "b"]);
        assert!(registry.get("a").is_ok());
        assert_eq!(
            registry.get("missing").err(),
            Some(RegistryError::UnknownVerifier("missing".into()))
        );
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut registry = VerifierRegistry::new();
        registry.register(Arc::new(Always("a"))).unwrap();
        assert_eq!(
            registry.register(Arc::new(Always("a"))),
            Err(RegistryError::Duplicate("a".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_builtins() {
        let registry = VerifierRegistry::with_builtins(Duration::from_secs(1));
        assert_eq!(
            registry.list_names(),
            vec!["Rest200OkVerifier", "TcpConnectVerifier"]
        );

        let infos = registry.describe();
        assert_eq!(infos[0].property_arguments, vec!["Uri"]);
        assert_eq!(infos[1].property_arguments, vec!["Host", "Port"]);
    }
}
