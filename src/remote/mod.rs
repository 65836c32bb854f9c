//! Talking to the remote catalog.
//!
//! - **rate_limit**: interval gate and backoff shared per endpoint
//! - **transport**: raw GraphQL-over-HTTP exchange
//! - **client**: page queries with retries and sort validation
//! - **favorites**: top-N favorited subjects for inclusion filters

pub mod client;
pub mod favorites;
pub mod rate_limit;
pub mod transport;

pub use client::{EntryPageSource, MAX_PER_PAGE, RemotePage, RemoteQueryClient, validate_sort};
pub use favorites::{FavoriteSource, FavoritesPage, resolve_favorites};
pub use rate_limit::RateLimiter;
pub use transport::{CatalogTransport, HttpTransport, TransportError};
