//! Public types for the endpoint-resolver crate.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite;

/// A boxed error type for collaborator callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ---------------------------------------------------------------------------
// Configuration (graphql-config wire form)
// ---------------------------------------------------------------------------

/// Name → value mapping that keeps declaration order.
///
/// First-entry defaults (initial project / environment) depend on the order
/// the configuration file declares them in, so this cannot be a `HashMap`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entries<V>(Vec<(String, V)>);

impl<V> Entries<V> {
    pub fn first(&self) -> Option<(&str, &V)> {
        self.0.first().map(|(name, value)| (name.as_str(), value))
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<V> Default for Entries<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> FromIterator<(String, V)> for Entries<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut entries = Entries::default();
        for (name, value) in iter {
            entries.insert(name, value);
        }
        entries
    }
}

impl<V> Entries<V> {
    /// Later duplicates replace the value but keep the original position.
    fn insert(&mut self, name: String, value: V) {
        match self.0.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Entries<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
            type Value = Entries<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Entries(Vec::with_capacity(map.size_hint().unwrap_or(0)));
                while let Some((name, value)) = map.next_entry::<String, V>()? {
                    entries.insert(name, value);
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

/// A graphql-config document: environments declared at the top level,
/// per project, or both.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GraphQlConfig {
    pub extensions: Option<Extensions>,
    pub projects: Option<Entries<Project>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Project {
    pub extensions: Option<Extensions>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Extensions {
    pub endpoints: Option<Entries<EndpointConfig>>,
}

/// One environment: either a bare URL or the detailed object form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EndpointConfig {
    Url(String),
    Detailed {
        url: String,
        #[serde(default)]
        headers: Option<HashMap<String, String>>,
        #[serde(default)]
        subscription: Option<SubscriptionConfig>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfig {
    pub url: String,
}

impl EndpointConfig {
    pub fn to_endpoints(&self) -> Endpoints {
        match self {
            EndpointConfig::Url(url) => Endpoints {
                endpoint: url.clone(),
                subscription_endpoint: None,
                headers: None,
            },
            EndpointConfig::Detailed {
                url,
                headers,
                subscription,
            } => Endpoints {
                endpoint: url.clone(),
                subscription_endpoint: subscription.as_ref().map(|s| s.url.clone()),
                headers: headers.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved values
// ---------------------------------------------------------------------------

/// The endpoint bundle declared by a single environment, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Endpoints {
    pub endpoint: String,
    /// Raw subscription hint (relative path or absolute URL).
    pub subscription_endpoint: Option<String>,
    pub headers: Option<HashMap<String, String>>,
}

/// The currently chosen project / environment pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSelection {
    pub project_name: Option<String>,
    pub env_name: Option<String>,
}

/// Immutable snapshot of the resolved endpoints.
///
/// Every transition produces a new snapshot; consumers never observe a
/// partially applied update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointState {
    /// Always absolute.
    pub endpoint: String,
    /// Always `ws://` or `wss://` when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_endpoint: Option<String>,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_project: Option<String>,
    pub config_is_structured_format: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_token: Option<String>,
}

impl EndpointState {
    pub(crate) fn with_subscription_endpoint(&self, subscription_endpoint: Option<String>) -> Self {
        Self {
            subscription_endpoint,
            ..self.clone()
        }
    }
}

/// Change notifications emitted by the [`EndpointStateStore`](crate::EndpointStateStore).
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// The primary endpoint changed.
    EndpointChanged(String),
    /// The subscription endpoint changed (including discovery completing).
    SubscriptionEndpointChanged(Option<String>),
    /// An environment switch was applied.
    EnvironmentSelected {
        env: String,
        project: Option<String>,
    },
    /// The raw configuration text was replaced.
    ConfigChanged { is_structured_format: bool },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment not found: {env}{}", in_project(.project))]
    EnvironmentNotFound {
        env: String,
        project: Option<String>,
    },

    #[error("config parse error: {0}")]
    Parse(String),
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("not a ws:// or wss:// URL: {0}")]
    NotRealtime(String),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("token storage error: {0}")]
    Storage(BoxError),

    #[error("page navigation error: {0}")]
    Navigation(BoxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fn in_project(project: &Option<String>) -> String {
    project
        .as_deref()
        .map(|p| format!(" (project {p})"))
        .unwrap_or_default()
}
