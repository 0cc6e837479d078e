//! REST provider for Mimic.
//!
//! Serves saved `(method, path, data)` responses over plain HTTP, routed
//! through a segment trie with `:param` wildcard support.

pub mod provider;
pub mod router;

pub use provider::RestProvider;
pub use router::{RestRoute, RouteMatch, RouterTree};
