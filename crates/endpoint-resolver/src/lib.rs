//! GraphQL endpoint resolution for an interactive GraphQL client.
//!
//! Decides which HTTP endpoint, subscription (WebSocket) endpoint and request
//! headers a client talks to, from explicit options, page query parameters
//! and a graphql-config document with named projects and environments.
//!
//! # Features
//! - graphql-config parsing with declaration-order defaults
//! - Realtime URL derivation, including the managed-service conventions
//! - Subscription endpoint discovery over the `graphql-ws` handshake
//! - Atomic environment switching with change notifications
//! - One-time platform token bootstrap from the page URL
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), endpoint_resolver::Error> {
//! use std::sync::Arc;
//!
//! use endpoint_resolver::{
//!     EndpointStateStore, MemoryStorage, StaticPage, StoreContext, StoreOptions,
//! };
//!
//! let context = StoreContext::new(
//!     Arc::new(StaticPage::new("http://localhost:3000/?endpoint=/graphql")),
//!     Arc::new(MemoryStorage::new()),
//! );
//! let mut store = EndpointStateStore::new(StoreOptions::default(), context)?;
//! let state = store.wait_for_discovery().await;
//! println!("{} / {:?}", state.endpoint, state.subscription_endpoint);
//! # Ok(())
//! # }
//! ```

pub mod config;
mod location;
pub mod normalize;
pub mod probe;
pub mod protocol;
mod store;
mod types;

pub use location::{MemoryStorage, PageLocation, PageUrl, StaticPage, TokenStorage};
pub use probe::{
    DEFAULT_PROBE_TIMEOUT, HandshakeProbe, WsProbe, find_first_valid, find_first_valid_with,
    generate_candidates,
};
pub use store::{EndpointStateStore, PLATFORM_TOKEN_KEY, StoreContext, StoreEvents, StoreOptions};
pub use types::{
    ActiveSelection, BoxError, ConfigError, EndpointConfig, EndpointState, Endpoints, Entries,
    Error, Extensions, GraphQlConfig, Project, Result, StoreEvent, SubscriptionConfig,
};
