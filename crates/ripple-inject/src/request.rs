#![forbid(unsafe_code)]

//! Declarations a node carries: what it provides and what it injects.
//!
//! Every accepted shape of an injection declaration (a list of names, an
//! alias map, explicit requests) normalizes to one [`Injections`] table of
//! `local key -> {from, default}` in declaration order.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use ripple_core::Value;

use crate::key::Key;
use crate::node::Node;

pub type Provided = IndexMap<Key, Value>;
pub type ProvideFactory = Rc<dyn Fn(&Node) -> Provided>;
pub type DefaultFactory = Rc<dyn Fn(&Node) -> Value>;

/// What a node makes available to its descendants.
#[derive(Clone)]
pub enum Provide {
    Static(Provided),
    /// Called once, at initialization, with the providing node.
    Factory(ProvideFactory),
}

impl Provide {
    #[must_use]
    pub fn values<K: Into<Key>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Static(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    #[must_use]
    pub fn factory(f: impl Fn(&Node) -> Provided + 'static) -> Self {
        Self::Factory(Rc::new(f))
    }

    /// Produce the provider record for `node`.
    #[must_use]
    pub fn materialize(&self, node: &Node) -> Provided {
        match self {
            Self::Static(values) => values.clone(),
            Self::Factory(f) => f(node),
        }
    }
}

impl fmt::Debug for Provide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(values) => f.debug_tuple("Static").field(values).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Fallback used when no ancestor provides the source key.
#[derive(Clone)]
pub enum InjectDefault {
    Value(Value),
    /// Called with the consuming node.
    Factory(DefaultFactory),
}

impl InjectDefault {
    #[must_use]
    pub fn produce(&self, node: &Node) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Factory(f) => f(node),
        }
    }
}

impl fmt::Debug for InjectDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// One normalized injection request.
#[derive(Debug, Clone)]
pub struct InjectRequest {
    pub from: Key,
    pub default: Option<InjectDefault>,
}

impl InjectRequest {
    /// Request `from` with no default.
    #[must_use]
    pub fn source(from: impl Into<Key>) -> Self {
        Self {
            from: from.into(),
            default: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(InjectDefault::Value(value.into()));
        self
    }

    #[must_use]
    pub fn with_default_factory(mut self, f: impl Fn(&Node) -> Value + 'static) -> Self {
        self.default = Some(InjectDefault::Factory(Rc::new(f)));
        self
    }
}

/// Normalized injection table, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Injections {
    entries: IndexMap<Key, InjectRequest>,
}

impl Injections {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `["a", "b"]`: each name injects the provision of the same name.
    #[must_use]
    pub fn from_names<K: Into<Key>>(names: impl IntoIterator<Item = K>) -> Self {
        let entries = names
            .into_iter()
            .map(|name| {
                let key = name.into();
                (key.clone(), InjectRequest::source(key))
            })
            .collect();
        Self { entries }
    }

    /// `{local: source}` pairs.
    #[must_use]
    pub fn from_aliases<L: Into<Key>, S: Into<Key>>(
        aliases: impl IntoIterator<Item = (L, S)>,
    ) -> Self {
        let entries = aliases
            .into_iter()
            .map(|(local, source)| (local.into(), InjectRequest::source(source)))
            .collect();
        Self { entries }
    }

    /// Add (or replace) a full request under `local`.
    #[must_use]
    pub fn with(mut self, local: impl Into<Key>, request: InjectRequest) -> Self {
        self.entries.insert(local.into(), request);
        self
    }

    /// Shorthand for a request whose source key equals the local key.
    #[must_use]
    pub fn with_key(self, local: impl Into<Key>) -> Self {
        let local = local.into();
        let request = InjectRequest::source(local.clone());
        self.with(local, request)
    }

    #[must_use]
    pub fn get(&self, local: &Key) -> Option<&InjectRequest> {
        self.entries.get(local)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &InjectRequest)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
