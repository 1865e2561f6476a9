//! Credential provider implementations.

mod chain;
#[cfg(feature = "developer-tools")]
mod cli;
mod environment;
mod explicit;
mod http;
mod managed_identity;
mod workload_identity;

pub use chain::{AttemptOutcome, ChainProvider, SourceAttempt};
#[cfg(feature = "developer-tools")]
pub use cli::{AzureCliProvider, AzureDeveloperCliProvider};
pub use environment::EnvironmentProvider;
pub use explicit::ExplicitProvider;
pub use managed_identity::{ManagedIdentityEndpoint, ManagedIdentityProvider};
pub use workload_identity::WorkloadIdentityProvider;
