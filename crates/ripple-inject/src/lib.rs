#![forbid(unsafe_code)]

//! Provide/inject over a node hierarchy.
//!
//! An ancestor [`Node`] declares a [`Provide`]; a descendant declares
//! [`Injections`]. At construction the descendant walks up its lineage,
//! binds the first matching provision (or a default) to each local key, and
//! installs the results as reactive fields.
//!
//! ```
//! use ripple_core::Value;
//! use ripple_inject::{Injections, Node, Provide};
//!
//! let app = Node::builder()
//!     .provide(Provide::values([("theme", Value::from("dark"))]))
//!     .build();
//! let button = Node::builder()
//!     .parent(&app)
//!     .inject(Injections::from_names(["theme"]))
//!     .build();
//! assert_eq!(button.get("theme"), Some(Value::from("dark")));
//! ```

pub mod inject;
pub mod key;
pub mod node;
pub mod request;

pub use inject::{init_injections, init_provide, resolve_inject};
pub use key::{Key, RESERVED_KEY, Token};
pub use node::{Node, NodeBuilder, NodeId};
pub use request::{InjectDefault, InjectRequest, Injections, Provide, Provided};
