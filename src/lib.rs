//! Hetzner Cloud workspace provider.
//!
//! Provisions ephemeral remote development environments on Hetzner Cloud,
//! joins them to a private overlay network, and drives container lifecycle
//! operations on each host over that network. The entry point is
//! [`HetznerProvider`]; the other modules back its operations.

pub mod bootstrap;
pub mod config;
pub mod docker;
pub mod error;
pub mod hcloud;
pub mod logs;
pub mod overlay;
pub mod provider;
pub mod ssh;
pub mod target;
pub mod types;

pub use config::InitializeProviderRequest;
pub use error::{ProviderError, Result};
pub use provider::HetznerProvider;
