//! Credential resolution per library family.
//!
//! Each family maps to one named injection strategy via a lookup table,
//! with a generic environment-key strategy as the fallback. Resolution is
//! a pure function over an explicit environment snapshot; a missing
//! credential is not an error here — it only becomes one if the call
//! actually requires it and fails authentication.

use std::{collections::BTreeMap, collections::HashMap, fmt, sync::Arc};

use serde::Serialize;

/// Immutable view of the environment at resolution time.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot(BTreeMap<String, String>);

impl EnvSnapshot {
    pub fn from_process() -> Self {
        Self(std::env::vars().collect())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Outcome of credential resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "resolution")]
pub enum CredentialResolution {
    Credential(CredentialHandle),
    NoCredential,
}

impl CredentialResolution {
    pub fn into_handle(self) -> Option<CredentialHandle> {
        match self {
            CredentialResolution::Credential(handle) => Some(handle),
            CredentialResolution::NoCredential => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, CredentialResolution::Credential(_))
    }
}

/// Opaque credential produced by a strategy. The secret material never
/// appears in logs or serialized output.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct CredentialHandle {
    pub strategy: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_key: Option<String>,
    #[serde(skip)]
    secret: Option<String>,
}

impl CredentialHandle {
    pub fn ambient(strategy: &'static str) -> Self {
        Self {
            strategy,
            env_key: None,
            secret: None,
        }
    }

    pub fn from_env(strategy: &'static str, env_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            strategy,
            env_key: Some(env_key.into()),
            secret: Some(secret.into()),
        }
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }
}

impl fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialHandle")
            .field("strategy", &self.strategy)
            .field("env_key", &self.env_key)
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// One credential-injection strategy.
pub trait AuthProvider: Send + Sync {
    fn strategy(&self) -> &'static str;

    fn resolve(&self, family: &str, env: &EnvSnapshot) -> CredentialResolution;
}

/// Kubeconfig path or in-cluster service account.
struct KubeConfigAuth;

impl AuthProvider for KubeConfigAuth {
    fn strategy(&self) -> &'static str {
        "kube-config"
    }

    fn resolve(&self, _family: &str, env: &EnvSnapshot) -> CredentialResolution {
        if let Some(path) = env.get("KUBECONFIG") {
            return CredentialResolution::Credential(CredentialHandle::from_env(
                self.strategy(),
                "KUBECONFIG",
                path,
            ));
        }
        if env.contains("KUBERNETES_SERVICE_HOST") {
            return CredentialResolution::Credential(CredentialHandle::ambient("in-cluster"));
        }
        CredentialResolution::NoCredential
    }
}

/// Personal access token from a fixed environment key.
struct TokenAuth {
    env_key: &'static str,
}

impl AuthProvider for TokenAuth {
    fn strategy(&self) -> &'static str {
        "personal-access-token"
    }

    fn resolve(&self, _family: &str, env: &EnvSnapshot) -> CredentialResolution {
        match env.get(self.env_key) {
            Some(token) => CredentialResolution::Credential(CredentialHandle::from_env(
                self.strategy(),
                self.env_key,
                token,
            )),
            None => CredentialResolution::NoCredential,
        }
    }
}

/// Cloud SDK default credential chain; the SDK itself picks up ambient
/// configuration, we only report whether any chain marker is present.
struct CloudDefaultChainAuth {
    markers: &'static [&'static str],
}

impl AuthProvider for CloudDefaultChainAuth {
    fn strategy(&self) -> &'static str {
        "cloud-default-chain"
    }

    fn resolve(&self, _family: &str, env: &EnvSnapshot) -> CredentialResolution {
        if self.markers.iter().any(|m| env.contains(m)) {
            CredentialResolution::Credential(CredentialHandle::ambient(self.strategy()))
        } else {
            CredentialResolution::NoCredential
        }
    }
}

/// Fallback: `{FAMILY}_API_KEY`, family upper-cased with `-`/`.` as `_`.
struct GenericEnvKeyAuth;

impl GenericEnvKeyAuth {
    fn env_key(family: &str) -> String {
        let mut key: String = family
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        key.push_str("_API_KEY");
        key
    }
}

impl AuthProvider for GenericEnvKeyAuth {
    fn strategy(&self) -> &'static str {
        "generic-env-key"
    }

    fn resolve(&self, family: &str, env: &EnvSnapshot) -> CredentialResolution {
        let key = Self::env_key(family);
        match env.get(&key) {
            Some(secret) => CredentialResolution::Credential(CredentialHandle::from_env(
                self.strategy(),
                key,
                secret,
            )),
            None => CredentialResolution::NoCredential,
        }
    }
}

/// Family → strategy table with the generic strategy as fallback.
pub struct AuthResolver {
    providers: HashMap<String, Arc<dyn AuthProvider>>,
    fallback: Arc<dyn AuthProvider>,
}

impl AuthResolver {
    /// Resolver with the built-in family table.
    pub fn with_defaults() -> Self {
        let mut resolver = Self {
            providers: HashMap::new(),
            fallback: Arc::new(GenericEnvKeyAuth),
        };
        resolver.register("kubernetes", Arc::new(KubeConfigAuth));
        resolver.register(
            "github",
            Arc::new(TokenAuth {
                env_key: "GITHUB_TOKEN",
            }),
        );
        let aws = Arc::new(CloudDefaultChainAuth {
            markers: &["AWS_ACCESS_KEY_ID", "AWS_PROFILE", "AWS_ROLE_ARN"],
        });
        resolver.register("aws", Arc::clone(&aws) as Arc<dyn AuthProvider>);
        resolver.register("boto3", aws);
        resolver.register(
            "azure",
            Arc::new(CloudDefaultChainAuth {
                markers: &["AZURE_CLIENT_ID", "AZURE_TENANT_ID", "AZURE_SUBSCRIPTION_ID"],
            }),
        );
        resolver
    }

    pub fn register(&mut self, family: impl Into<String>, provider: Arc<dyn AuthProvider>) {
        self.providers.insert(family.into(), provider);
    }

    pub fn resolve(&self, family: &str, env: &EnvSnapshot) -> CredentialResolution {
        let provider = self.providers.get(family).unwrap_or(&self.fallback);
        provider.resolve(family, env)
    }

    /// Strategy name that would handle the family, for diagnostics.
    pub fn strategy_for(&self, family: &str) -> &'static str {
        self.providers
            .get(family)
            .map(|p| p.strategy())
            .unwrap_or_else(|| self.fallback.strategy())
    }
}

impl Default for AuthResolver {
    fn default() -> Self {
        Self::with_defaults()
    }
}
