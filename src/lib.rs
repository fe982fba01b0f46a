//! Client-side service discovery cache for Consul.
//!
//! Watches service health lists and KV entries through long-poll
//! subscriptions and serves the latest known value to application code:
//!
//! ```no_run
//! use consul_discovery::{ConsulDiscoveryService, DiscoveryContext};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let context = DiscoveryContext::builder().build().unwrap();
//!     let discovery = ConsulDiscoveryService::new(context).unwrap();
//!
//!     if let Some(endpoint) = discovery.get_connection("billing").await.unwrap() {
//!         println!("billing at {}:{}", endpoint.host, endpoint.port);
//!     }
//! }
//! ```

mod completion;
mod config;
mod constants;
mod discovery;
mod errors;
mod normalize;
mod registry;
mod watch;
pub mod utils;

pub use completion::*;
pub use config::*;
pub use constants::*;
pub use discovery::*;
pub use errors::*;
pub use normalize::*;
pub use registry::*;
pub use watch::ResourceSnapshot;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod completion_test;
