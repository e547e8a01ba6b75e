//! One transfer session bound to a local address, with an explicit lifecycle.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use seedcheck_core::engine::AlertKind;
use seedcheck_core::{EngineConfig, Session, SessionHandle, ShutdownToken};

use crate::error::{HarnessError, Result};

/// Poll interval while waiting for listen alerts
const LISTEN_POLL: Duration = Duration::from_millis(100);

/// Lifecycle of a [`PeerEndpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Created,
    Listening,
    Active,
    Aborting,
    Closed,
}

impl EndpointState {
    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: EndpointState) -> bool {
        use EndpointState::*;
        matches!(
            (self, next),
            (Created, Listening)
                | (Listening, Active)
                | (Created | Listening | Active, Aborting)
                | (Aborting, Closed)
        )
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndpointState::Created => "created",
            EndpointState::Listening => "listening",
            EndpointState::Active => "active",
            EndpointState::Aborting => "aborting",
            EndpointState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A transfer session owned by the harness for the length of a run.
pub struct PeerEndpoint {
    label: String,
    requested_address: SocketAddr,
    bound_address: Option<SocketAddr>,
    state: EndpointState,
    handle: SessionHandle,
    session: Option<Session>,
}

impl PeerEndpoint {
    /// Spawns a session that listens on `address`.
    pub fn create(label: impl Into<String>, address: SocketAddr) -> Self {
        Self::with_config(label, EngineConfig::with_listen_address(address))
    }

    /// Spawns a session from a full engine configuration.
    pub fn with_config(label: impl Into<String>, config: EngineConfig) -> Self {
        let label = label.into();
        let requested_address = config.network.listen_address;
        let session = Session::spawn(config);
        tracing::debug!("Created endpoint {} for {}", label, requested_address);

        Self {
            label,
            requested_address,
            bound_address: None,
            state: EndpointState::Created,
            handle: session.handle().clone(),
            session: Some(session),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Address the session actually bound, once listening.
    pub fn bound_address(&self) -> Option<SocketAddr> {
        self.bound_address
    }

    pub fn session(&self) -> &SessionHandle {
        &self.handle
    }

    /// Blocks until the session reports a bound listening address.
    ///
    /// Consumes session alerts while waiting. Moves the endpoint from
    /// `Created` to `Listening`.
    ///
    /// # Errors
    ///
    /// - `HarnessError::ListenFailed` - If the session could not bind
    /// - `HarnessError::ListenTimeout` - If no listen alert arrived within `timeout`
    /// - `HarnessError::InvalidTransition` - If the endpoint is not `Created`
    pub async fn wait_until_listening(&mut self, timeout: Duration) -> Result<SocketAddr> {
        self.check_transition(EndpointState::Listening)?;

        let started = Instant::now();
        loop {
            for alert in self.handle.pop_alerts() {
                match alert.kind {
                    AlertKind::ListenSucceeded { address } => {
                        self.bound_address = Some(address);
                        self.state = EndpointState::Listening;
                        tracing::info!("{} listening on {}", self.label, address);
                        return Ok(address);
                    }
                    AlertKind::ListenFailed { address, reason } => {
                        return Err(HarnessError::ListenFailed {
                            label: self.label.clone(),
                            address,
                            reason,
                        });
                    }
                    _ => {}
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(HarnessError::ListenTimeout {
                    label: self.label.clone(),
                    timeout,
                });
            }
            self.handle
                .wait_for_alert((timeout - elapsed).min(LISTEN_POLL))
                .await;
        }
    }

    /// Marks the endpoint as transferring.
    pub(crate) fn activate(&mut self) -> Result<()> {
        self.transition(EndpointState::Active)
    }

    /// Issues a non-blocking abort and returns the teardown token.
    ///
    /// # Errors
    ///
    /// - `HarnessError::InvalidTransition` - If the endpoint is already aborting or closed
    pub(crate) fn begin_abort(&mut self) -> Result<ShutdownToken> {
        self.check_transition(EndpointState::Aborting)?;
        let Some(session) = self.session.take() else {
            return Err(self.invalid(EndpointState::Aborting));
        };
        self.state = EndpointState::Aborting;
        tracing::debug!("Aborting {} ({})", self.label, self.requested_address);
        Ok(session.abort())
    }

    /// Records that teardown finished.
    pub(crate) fn mark_closed(&mut self) -> Result<()> {
        self.transition(EndpointState::Closed)
    }

    fn transition(&mut self, next: EndpointState) -> Result<()> {
        self.check_transition(next)?;
        tracing::trace!("{}: {} -> {}", self.label, self.state, next);
        self.state = next;
        Ok(())
    }

    fn check_transition(&self, next: EndpointState) -> Result<()> {
        if self.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(self.invalid(next))
        }
    }

    fn invalid(&self, to: EndpointState) -> HarnessError {
        HarnessError::InvalidTransition {
            label: self.label.clone(),
            from: self.state,
            to,
        }
    }
}

impl fmt::Debug for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerEndpoint")
            .field("label", &self.label)
            .field("requested_address", &self.requested_address)
            .field("bound_address", &self.bound_address)
            .field("state", &self.state)
            .finish()
    }
}
