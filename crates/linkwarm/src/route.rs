//! Route keys, navigation targets and the route → loader map

use crate::LoaderError;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future returned by a loader invocation
pub type LoaderFuture = BoxFuture<'static, std::result::Result<(), LoaderError>>;

/// Zero-argument loader that warms the resource behind a route.
///
/// Calling the function starts the load; the returned future settles once
/// the resource is resident.
pub type LoaderFn = Arc<dyn Fn() -> LoaderFuture + Send + Sync>;

/// Wrap an async closure as a [`LoaderFn`]
pub fn loader_fn<F, Fut>(f: F) -> LoaderFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), LoaderError>> + Send + 'static,
{
    Arc::new(move || -> LoaderFuture { Box::pin(f()) })
}

/// Canonical, normalized path identifying a prefetchable route
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteKey(String);

impl RouteKey {
    /// Create a route key from a normalized path
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Path as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteKey {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

impl From<String> for RouteKey {
    fn from(path: String) -> Self {
        Self(path)
    }
}

impl Borrow<str> for RouteKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RouteKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Navigation target as handed over by the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NavTarget {
    /// Plain path string
    Path { value: String },
    /// Structured location; only the pathname takes part in resolution
    Location {
        pathname: String,
        #[serde(default)]
        search: Option<String>,
        #[serde(default)]
        hash: Option<String>,
    },
}

impl NavTarget {
    /// Target for a plain path
    pub fn path(value: impl Into<String>) -> Self {
        NavTarget::Path {
            value: value.into(),
        }
    }

    /// The path used for resolution
    pub fn pathname(&self) -> &str {
        match self {
            NavTarget::Path { value } => value,
            NavTarget::Location { pathname, .. } => pathname,
        }
    }
}

impl From<&str> for NavTarget {
    fn from(value: &str) -> Self {
        NavTarget::path(value)
    }
}

impl From<String> for NavTarget {
    fn from(value: String) -> Self {
        NavTarget::Path { value }
    }
}

/// Insertion-ordered map from route key to loader.
///
/// Built once and shared behind an `Arc`; replacing the routes means
/// configuring a new map.
#[derive(Clone, Default)]
pub struct RouteModules {
    loaders: IndexMap<RouteKey, LoaderFn>,
}

impl RouteModules {
    /// Create an empty route map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route (builder style). A repeated key keeps its original position.
    pub fn with_route(mut self, key: impl Into<RouteKey>, loader: LoaderFn) -> Self {
        self.insert(key, loader);
        self
    }

    /// Add or replace a route
    pub fn insert(&mut self, key: impl Into<RouteKey>, loader: LoaderFn) {
        self.loaders.insert(key.into(), loader);
    }

    /// Loader registered under exactly this key
    pub fn get(&self, key: &str) -> Option<&LoaderFn> {
        self.loaders.get(key)
    }

    /// Key and loader registered under exactly this key
    pub fn get_entry(&self, key: &str) -> Option<(&RouteKey, &LoaderFn)> {
        self.loaders.get_key_value(key)
    }

    /// Whether a key is registered
    pub fn contains(&self, key: &str) -> bool {
        self.loaders.contains_key(key)
    }

    /// Routes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&RouteKey, &LoaderFn)> {
        self.loaders.iter()
    }

    /// Route keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &RouteKey> {
        self.loaders.keys()
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl fmt::Debug for RouteModules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteModules")
            .field("routes", &self.loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FromIterator<(RouteKey, LoaderFn)> for RouteModules {
    fn from_iter<I: IntoIterator<Item = (RouteKey, LoaderFn)>>(iter: I) -> Self {
        Self {
            loaders: iter.into_iter().collect(),
        }
    }
}
