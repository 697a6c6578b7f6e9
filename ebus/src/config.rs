//! The optional configuration-source collaborator.

use std::collections::HashMap;

/// A keyed lookup over string configuration values. The core only reads a
/// handful of well-known keys (currently just `backend`) and ignores
/// anything it doesn't recognise.
pub trait ConfigSource: Send + Sync {
    /// Look up `key`, returning `None` if it is not present.
    fn get(&self, key: &str) -> Option<String>;
}

/// An in-memory source, mostly useful for tests.
#[derive(Debug, Default, Clone)]
pub struct MapConfigSource(HashMap<String, String>);

impl MapConfigSource {
    /// Build a source from an iterator of key/value pairs.
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl ConfigSource for MapConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

/// A source layered over environment variables (prefixed `EBUS_`) and an
/// optional TOML file, via the `config` crate.
pub struct LayeredConfigSource {
    inner: ::config::Config,
}

impl LayeredConfigSource {
    /// Build a layered source, optionally reading `path` as a TOML file
    /// underneath the `EBUS_`-prefixed environment overlay.
    pub fn new(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(false));
        }
        builder = builder.add_source(::config::Environment::with_prefix("EBUS"));
        Ok(Self {
            inner: builder.build()?,
        })
    }
}

impl ConfigSource for LayeredConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get_string(key).ok()
    }
}

/// Which router backend an `EnvironmentFactory` should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// The only backend this core implements: a single in-process router.
    Single,
}

/// Resolve the `backend` key against the only backend this core supports.
/// Falls back to the single in-process backend for unknown or absent keys,
/// logging a warning when the key named something unrecognised.
pub fn resolve_backend(source: &dyn ConfigSource) -> Backend {
    match source.get("backend").as_deref() {
        Some("single") | None => Backend::Single,
        Some(other) => {
            tracing::warn!(backend = other, "unrecognised backend, falling back to single");
            Backend::Single
        }
    }
}
