//! API key resolution
//!
//! Priority: external key selector > stored key > environment.

mod store;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::{Error, Result};

pub use store::KeyStore;

/// Environment variables consulted for a key, in order
pub const ENV_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// An externally managed key-selection capability
///
/// Queried before any other source when present.
#[async_trait]
pub trait KeySelector: Send + Sync {
    /// The key the user selected, if any
    async fn selected_key(&self) -> Result<Option<SecretString>>;
}

/// Runs a helper command and uses its trimmed stdout as the key
///
/// For password managers and credential helpers, e.g. `pass show gemini`.
pub struct CommandKeySelector {
    program: String,
    args: Vec<String>,
}

impl CommandKeySelector {
    /// Parse a whitespace-separated command line
    ///
    /// # Errors
    ///
    /// Returns error if the command line is empty
    pub fn parse(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(ToString::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("key command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl KeySelector for CommandKeySelector {
    async fn selected_key(&self) -> Result<Option<SecretString>> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::Config(format!(
                "key command `{}` exited with {}",
                self.program, output.status
            )));
        }

        let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!key.is_empty()).then(|| SecretString::from(key)))
    }
}

/// Where a resolved key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Selector,
    Stored,
    Environment,
}

/// An API key and its origin
pub struct ResolvedKey {
    pub api_key: SecretString,
    pub source: KeySource,
}

/// Resolves the API key from every configured source
pub struct CredentialResolver {
    selector: Option<Box<dyn KeySelector>>,
    store: Option<KeyStore>,
    env_key: Option<SecretString>,
}

impl CredentialResolver {
    /// Create a resolver over explicit sources
    #[must_use]
    pub fn new(
        selector: Option<Box<dyn KeySelector>>,
        store: Option<KeyStore>,
        env_key: Option<SecretString>,
    ) -> Self {
        Self {
            selector,
            store,
            env_key,
        }
    }

    /// Read the environment key from [`ENV_KEY_VARS`]
    #[must_use]
    pub fn env_key() -> Option<SecretString> {
        ENV_KEY_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .map(SecretString::from)
    }

    /// The persisted key store, if one is configured
    #[must_use]
    pub const fn store(&self) -> Option<&KeyStore> {
        self.store.as_ref()
    }

    /// Whether some source may yield a key without asking the user
    ///
    /// A configured selector counts, since it can only be checked by
    /// running it.
    #[must_use]
    pub fn has_key_source(&self) -> bool {
        self.selector.is_some()
            || self.env_key.is_some()
            || self
                .store
                .as_ref()
                .is_some_and(|store| matches!(store.get(), Ok(Some(_))))
    }

    /// Resolve a key; the first available source wins
    ///
    /// Failures of the selector or store are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` if no source yields a key
    pub async fn resolve(&self) -> Result<ResolvedKey> {
        if let Some(selector) = &self.selector {
            match selector.selected_key().await {
                Ok(Some(api_key)) => {
                    tracing::debug!("using key from key selector");
                    return Ok(ResolvedKey {
                        api_key,
                        source: KeySource::Selector,
                    });
                }
                Ok(None) => tracing::debug!("key selector returned no key"),
                Err(e) => tracing::warn!(error = %e, "key selector failed, trying stored key"),
            }
        }

        if let Some(store) = &self.store {
            match store.get() {
                Ok(Some(api_key)) => {
                    tracing::debug!("using stored key");
                    return Ok(ResolvedKey {
                        api_key,
                        source: KeySource::Stored,
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "key store unreadable, trying environment"),
            }
        }

        if let Some(api_key) = &self.env_key {
            tracing::debug!("using key from environment");
            return Ok(ResolvedKey {
                api_key: api_key.clone(),
                source: KeySource::Environment,
            });
        }

        Err(Error::MissingCredential)
    }

    /// Persist a key supplied by the user for future sessions
    ///
    /// # Errors
    ///
    /// Returns error if no store is configured or the write fails
    pub fn remember(&self, api_key: &SecretString) -> Result<()> {
        self.store
            .as_ref()
            .ok_or_else(|| Error::Config("no key store configured".to_string()))?
            .set(api_key)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    struct FixedSelector(Option<&'static str>);

    #[async_trait]
    impl KeySelector for FixedSelector {
        async fn selected_key(&self) -> Result<Option<SecretString>> {
            Ok(self.0.map(SecretString::from))
        }
    }

    struct BrokenSelector;

    #[async_trait]
    impl KeySelector for BrokenSelector {
        async fn selected_key(&self) -> Result<Option<SecretString>> {
            Err(Error::Config("helper missing".to_string()))
        }
    }

    fn store_with(key: Option<&str>) -> KeyStore {
        let store = KeyStore::new(crate::db::init_memory().unwrap());
        if let Some(key) = key {
            store.set(&SecretString::from(key)).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn selector_wins_over_everything() {
        let resolver = CredentialResolver::new(
            Some(Box::new(FixedSelector(Some("selected")))),
            Some(store_with(Some("stored"))),
            Some(SecretString::from("env")),
        );
        let key = resolver.resolve().await.unwrap();
        assert_eq!(key.source, KeySource::Selector);
        assert_eq!(key.api_key.expose_secret(), "selected");
    }

    #[tokio::test]
    async fn stored_key_used_without_selector() {
        let resolver = CredentialResolver::new(
            None,
            Some(store_with(Some("stored"))),
            Some(SecretString::from("env")),
        );
        let key = resolver.resolve().await.unwrap();
        assert_eq!(key.source, KeySource::Stored);
        assert_eq!(key.api_key.expose_secret(), "stored");
    }

    #[tokio::test]
    async fn falls_through_empty_and_failing_sources() {
        let resolver = CredentialResolver::new(
            Some(Box::new(BrokenSelector)),
            Some(store_with(None)),
            Some(SecretString::from("env")),
        );
        let key = resolver.resolve().await.unwrap();
        assert_eq!(key.source, KeySource::Environment);

        let resolver = CredentialResolver::new(
            Some(Box::new(FixedSelector(None))),
            None,
            Some(SecretString::from("env")),
        );
        assert_eq!(resolver.resolve().await.unwrap().source, KeySource::Environment);
    }

    #[tokio::test]
    async fn nothing_configured_is_missing_credential() {
        let resolver = CredentialResolver::new(None, Some(store_with(None)), None);
        assert!(matches!(resolver.resolve().await, Err(Error::MissingCredential)));
    }

    #[tokio::test]
    async fn remembered_key_resolves_next_time() {
        let resolver = CredentialResolver::new(None, Some(store_with(None)), None);
        resolver.remember(&SecretString::from("typed-in")).unwrap();
        let key = resolver.resolve().await.unwrap();
        assert_eq!(key.source, KeySource::Stored);
        assert_eq!(key.api_key.expose_secret(), "typed-in");
    }

    #[test]
    fn key_source_tracks_store_contents() {
        let resolver = CredentialResolver::new(None, Some(store_with(None)), None);
        assert!(!resolver.has_key_source());

        resolver.remember(&SecretString::from("typed-in")).unwrap();
        assert!(resolver.has_key_source());

        resolver.store().unwrap().remove().unwrap();
        assert!(!resolver.has_key_source());
        assert!(tokio_test::block_on(resolver.resolve()).is_err());

        let with_env = CredentialResolver::new(None, Some(store_with(None)), Some(SecretString::from("env")));
        assert!(with_env.has_key_source());
    }

    #[tokio::test]
    async fn command_selector_reads_stdout() {
        let selector = CommandKeySelector::parse("echo  from-helper ").unwrap();
        let key = selector.selected_key().await.unwrap().unwrap();
        assert_eq!(key.expose_secret(), "from-helper");

        assert!(CommandKeySelector::parse("   ").is_err());
    }
}
