//! Prelude module for convenient imports.
//!
//! ```rust
//! use azure_credential_chain::prelude::*;
//! ```

pub use crate::Error;
pub use crate::Result;

// Chain and sources
pub use crate::{AccessToken, ChainProvider, CredentialProvider, SourceKind, TokenRequest};

// Configuration
pub use crate::{ChainConfig, SourceSelection};

// Diagnostics
pub use crate::{DiagnosticLog, LogEntry, LogLevel};

// Policies
pub use crate::RetryPolicy;
