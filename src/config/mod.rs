//! Configuration for credential sources and the default chain.
//!
//! ```rust,no_run
//! use azure_credential_chain::config::ChainConfig;
//! use azure_credential_chain::SourceKind;
//!
//! # fn example() -> Result<(), azure_credential_chain::Error> {
//! let config = ChainConfig::from_env()?
//!     .exclude(SourceKind::AzureDeveloperCli)
//!     .with_diagnostics_capacity(512);
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod env;

pub use chain::{
    ChainConfig, DEFAULT_AUTHORITY_HOST, DEFAULT_IMDS_HOST, ManagedIdentityConfig, SourceSelection,
};
