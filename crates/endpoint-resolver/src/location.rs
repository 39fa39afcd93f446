//! Externally owned collaborators: the current page URL and persisted token
//! storage.

use std::collections::HashMap;
use std::sync::Mutex;

use url::Url;

use crate::types::{BoxError, Result};

/// The page the client is served from.
///
/// The store reads [`href`](PageLocation::href) once at construction and only
/// writes through [`replace`](PageLocation::replace) during the one-time
/// token bootstrap.
pub trait PageLocation: Send + Sync {
    fn href(&self) -> String;

    /// Navigate to `url`, replacing the current history entry.
    fn replace(&self, url: &str) -> std::result::Result<(), BoxError>;
}

/// Key/value storage that survives the session (e.g. browser local storage).
pub trait TokenStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> std::result::Result<(), BoxError>;
}

/// A page with a fixed href that records navigations instead of performing
/// them.
#[derive(Debug)]
pub struct StaticPage {
    href: String,
    replaced: Mutex<Vec<String>>,
}

impl StaticPage {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            replaced: Mutex::new(Vec::new()),
        }
    }

    /// Every URL passed to [`PageLocation::replace`], oldest first.
    pub fn replaced(&self) -> Vec<String> {
        self.replaced
            .lock()
            .map(|urls| urls.clone())
            .unwrap_or_default()
    }
}

impl PageLocation for StaticPage {
    fn href(&self) -> String {
        self.href.clone()
    }

    fn replace(&self, url: &str) -> std::result::Result<(), BoxError> {
        self.replaced
            .lock()
            .map_err(|e| format!("page lock poisoned: {e}"))?
            .push(url.to_string());
        Ok(())
    }
}

/// In-memory [`TokenStorage`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> std::result::Result<(), BoxError> {
        self.values
            .lock()
            .map_err(|e| format!("storage lock poisoned: {e}"))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Parsed page href.
#[derive(Debug, Clone, PartialEq)]
pub struct PageUrl {
    url: Url,
}

impl PageUrl {
    pub fn parse(href: &str) -> Result<Self> {
        Ok(Self {
            url: Url::parse(href)?,
        })
    }

    pub fn href(&self) -> &str {
        self.url.as_str()
    }

    /// `scheme://host[:port]`, no trailing slash.
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// `host[:port]`; the port is omitted when it is the scheme default.
    pub fn host(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// First value of query parameter `name`, form-decoded. Empty values
    /// count as absent.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }
}
