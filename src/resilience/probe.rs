//! Single-shot probe gate for metadata endpoints.
//!
//! The first request through a gated source owns the probe. Until it settles,
//! other callers wait for the outcome instead of issuing their own request.
//! A failed probe closes the gate for the lifetime of the gate: there is no
//! time-based half-open state.

use std::sync::Arc;

use tokio::sync::watch;

use super::RetryPolicy;
use crate::auth::TokenRequest;
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeState {
    Untested,
    InFlight,
    Succeeded,
    Failed(String),
}

impl ProbeState {
    pub fn is_settled(&self) -> bool {
        matches!(self, ProbeState::Succeeded | ProbeState::Failed(_))
    }
}

/// What a caller may do after consulting the gate.
#[derive(Debug)]
pub enum Admission {
    /// Caller performs the single probe attempt and must settle the ticket.
    Probe(ProbeTicket),
    /// Probe succeeded earlier; normal retry policy applies.
    Open,
    /// Probe failed earlier; no network I/O allowed.
    Closed(String),
}

#[derive(Clone, Debug)]
pub struct ProbeGate {
    state: Arc<watch::Sender<ProbeState>>,
}

impl ProbeGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ProbeState::Untested);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state.borrow().clone()
    }

    /// Consult the gate, waiting (bounded by the request) while a probe is in flight.
    pub async fn admit(&self, request: &TokenRequest, credential: &str) -> Result<Admission> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == ProbeState::Untested {
                *state = ProbeState::InFlight;
                true
            } else {
                false
            }
        });
        if claimed {
            tracing::debug!(credential, "probe claimed");
            return Ok(Admission::Probe(ProbeTicket {
                state: Arc::clone(&self.state),
                settled: false,
            }));
        }

        let mut rx = self.state.subscribe();
        let settled = request
            .run(credential, None, async move {
                rx.wait_for(ProbeState::is_settled)
                    .await
                    .map(|state| state.clone())
                    .map_err(|_| Error::unavailable(credential, "probe gate was dropped"))
            })
            .await?;

        match settled {
            ProbeState::Failed(reason) => Ok(Admission::Closed(reason)),
            _ => Ok(Admission::Open),
        }
    }
}

impl Default for ProbeGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Ownership of the one probe attempt.
///
/// Dropping an unsettled ticket (cancelled future, panic) records a failure,
/// so an abandoned probe still counts as the attempt.
#[derive(Debug)]
pub struct ProbeTicket {
    state: Arc<watch::Sender<ProbeState>>,
    settled: bool,
}

impl ProbeTicket {
    pub fn succeed(mut self) {
        self.settle(ProbeState::Succeeded);
    }

    pub fn fail(mut self, reason: impl Into<String>) {
        self.settle(ProbeState::Failed(reason.into()));
    }

    fn settle(&mut self, outcome: ProbeState) {
        self.settled = true;
        self.state.send_if_modified(move |state| {
            if *state == ProbeState::InFlight {
                *state = outcome;
                true
            } else {
                false
            }
        });
    }
}

impl Drop for ProbeTicket {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(ProbeState::Failed(
                "probe abandoned before the endpoint answered".into(),
            ));
        }
    }
}

/// Retry policy that defers to a [`ProbeGate`].
///
/// While the probe is outstanding the effective policy allows exactly one
/// attempt; afterwards the base policy applies.
#[derive(Clone, Debug)]
pub struct ProbeAwarePolicy {
    base: RetryPolicy,
    gate: ProbeGate,
}

impl ProbeAwarePolicy {
    pub fn new(base: RetryPolicy) -> Self {
        Self {
            base,
            gate: ProbeGate::new(),
        }
    }

    pub fn base(&self) -> &RetryPolicy {
        &self.base
    }

    pub fn gate(&self) -> &ProbeGate {
        &self.gate
    }

    pub async fn admit(&self, request: &TokenRequest, credential: &str) -> Result<Admission> {
        self.gate.admit(request, credential).await
    }

    pub fn policy_for(&self, admission: &Admission) -> RetryPolicy {
        match admission {
            Admission::Open => self.base.clone(),
            Admission::Probe(_) | Admission::Closed(_) => self.base.clone().with_max_retries(0),
        }
    }
}
