#![forbid(unsafe_code)]

//! Injection keys: plain names or opaque tokens.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bookkeeping key observed containers reserve for themselves. Never
/// resolved as an injection.
pub const RESERVED_KEY: &str = "__ob__";

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// An opaque, unique key. Two tokens are equal only if one is a clone of the
/// other, whatever their descriptions say.
#[derive(Clone)]
pub struct Token {
    id: u64,
    description: Rc<str>,
}

impl Token {
    #[must_use]
    pub fn new(description: &str) -> Self {
        Self {
            id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
            description: Rc::from(description),
        }
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({}#{})", self.description, self.id)
    }
}

/// Key of a provision, an injection request, or a node field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Name(Rc<str>),
    Token(Token),
}

impl Key {
    #[must_use]
    pub fn name(name: &str) -> Self {
        Self::Name(Rc::from(name))
    }

    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Token(_) => None,
        }
    }

    /// Whether this is [`RESERVED_KEY`].
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.as_name() == Some(RESERVED_KEY)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Token(token) => write!(f, "Token({})", token.description),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::name(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Name(Rc::from(name))
    }
}

impl From<Token> for Key {
    fn from(token: Token) -> Self {
        Self::Token(token)
    }
}

impl From<&Token> for Key {
    fn from(token: &Token) -> Self {
        Self::Token(token.clone())
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}
