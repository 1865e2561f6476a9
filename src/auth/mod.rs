//! Credential sources and the chain that selects among them.
//!
//! Provides multiple credential sources:
//! - **Environment**: service principal secret from `AZURE_CLIENT_SECRET`
//! - **Workload identity**: federated token file exchanged at the authority
//! - **Managed identity**: IMDS or App Service endpoint, behind a probe gate
//! - **Azure CLI / Azure Developer CLI**: the developer's existing login
//! - **Explicit**: a token supplied by the caller

mod provider;
mod providers;
mod request;
mod token;

pub use provider::{CredentialProvider, SourceDescriptor, SourceKind};
#[cfg(feature = "developer-tools")]
pub use providers::{AzureCliProvider, AzureDeveloperCliProvider};
pub use providers::{
    AttemptOutcome, ChainProvider, EnvironmentProvider, ExplicitProvider, ManagedIdentityEndpoint,
    ManagedIdentityProvider, SourceAttempt, WorkloadIdentityProvider,
};
pub use request::TokenRequest;
pub use token::AccessToken;
