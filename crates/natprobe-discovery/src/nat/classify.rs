//! RFC 3489 NAT classification
//!
//! Figure 2 of RFC 3489 (flow for type discovery) as an explicit state
//! machine. Each [`Step`] is one decision point of the flowchart; each leaf is
//! one [`NatType`]. At most four probes are sent and each step runs at most
//! once per classification.
//!
//! ```text
//!                        +--------+
//!                        |  Test  |
//!                        |   I    |
//!                        +--------+
//!                             |
//!                             V
//!                            /\              /\
//!                         N /  \ Y          /  \ Y             +--------+
//!          UDP     <-------/Resp\--------->/ IP \------------->|  Test  |
//!          Blocked         \ ?  /          \Same/              |   II   |
//!                           \  /            \? /               +--------+
//!                            \/              \/                    |
//!                                             | N                  |
//!                                             V                    V
//!                                         +--------+  Sym.      N /\
//!                                         |  Test  |  UDP    <---/Resp\
//!                                         |   II   |  Firewall   \ ? /
//!                                         +--------+              \/
//!                                             |                    |Y
//!                                             V                    V
//!                  /\                         /\                 Open
//!   Symmetric  N  /  \       +--------+   N  /  \              Internet
//!      NAT  <--- / IP \<-----|  Test  |<--- /Resp\
//!                \Same/      |   I    |     \ ?  /
//!                 \? /       +--------+      \  /
//!                  \/                         \/
//!                  |Y                          |Y
//!                  V                           V
//!              +--------+        /\           Full
//!              |  Test  |------>/  \ Y        Cone
//!              |   III  |      /Resp\---->Restricted
//!              +--------+      \ ?  /
//!                               \  /
//!                                \/ N
//!                                 +------>Port Restricted
//! ```

use super::host::Host;
use super::probe::{ProbeError, Prober};
use super::types::NatType;
use thiserror::Error;

/// Reasons a classification ends in [`NatType::Error`]
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A probe failed at the transport level
    #[error("probe failed: {0}")]
    Transport(#[from] ProbeError),

    /// A response came from an address the server should not have used
    #[error("server error: response came from an unexpected IP/port")]
    AddrNotMatch,

    /// The server advertised neither CHANGED-ADDRESS nor OTHER-ADDRESS
    #[error("server error: no changed or other address")]
    NoOtherAddr,

    /// The STUN server name could not be resolved
    #[error("failed to resolve STUN server {server}: {source}")]
    Resolve {
        /// Server as configured
        server: String,
        /// Underlying resolver error
        source: std::io::Error,
    },

    /// Local socket setup failed before any probe was sent
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one classification run
///
/// `error` is set exactly when `nat_type` is [`NatType::Error`]. `hosts`
/// holds every mapped address observed before the run ended, in order: one
/// for most leaves, two for [`NatType::Symmetric`], none for
/// [`NatType::Blocked`].
#[derive(Debug)]
pub struct Classification {
    /// Detected NAT type
    pub nat_type: NatType,
    /// Observed external addresses
    pub hosts: Vec<Host>,
    /// Cause of an [`NatType::Error`] result
    pub error: Option<DiscoveryError>,
}

impl Classification {
    fn leaf(nat_type: NatType, hosts: Vec<Host>) -> Self {
        Self {
            nat_type,
            hosts,
            error: None,
        }
    }

    pub(crate) fn failed(hosts: Vec<Host>, error: DiscoveryError) -> Self {
        Self {
            nat_type: NatType::Error,
            hosts,
            error: Some(error),
        }
    }

    /// Whether the run ended without an error
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// First observed external address
    #[must_use]
    pub fn external_addr(&self) -> Option<Host> {
        self.hosts.first().copied()
    }

    /// Split into the NAT type and hosts, or the error
    ///
    /// # Errors
    ///
    /// Returns the discovery error if the run failed; the partial host list
    /// is dropped.
    pub fn into_result(self) -> Result<(NatType, Vec<Host>), DiscoveryError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok((self.nat_type, self.hosts)),
        }
    }
}

/// Flowchart decision points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Test I against the primary address
    Baseline,
    /// Test II against the primary address
    CrossAddress {
        identical: bool,
        mapped: Host,
        alternate: Host,
    },
    /// Test I against the alternate address
    MappingStability { mapped: Host, alternate: Host },
    /// Test III against the alternate address
    PortFiltering { alternate: Host },
}

enum Transition {
    Next(Step),
    Leaf(NatType),
}

/// One classification run's private state
struct Run<'p, P> {
    prober: &'p P,
    server: Host,
    hosts: Vec<Host>,
}

impl<P: Prober> Run<'_, P> {
    async fn advance(&mut self, step: Step) -> Result<Transition, DiscoveryError> {
        match step {
            Step::Baseline => self.baseline().await,
            Step::CrossAddress {
                identical,
                mapped,
                alternate,
            } => self.cross_address(identical, mapped, alternate).await,
            Step::MappingStability { mapped, alternate } => {
                self.mapping_stability(mapped, alternate).await
            }
            Step::PortFiltering { alternate } => self.port_filtering(alternate).await,
        }
    }

    async fn baseline(&mut self) -> Result<Transition, DiscoveryError> {
        tracing::debug!("Do Test1");
        tracing::debug!("Send To: {}", self.server);
        let Some(resp) = self.prober.test1(self.server).await? else {
            return Ok(Transition::Leaf(NatType::Blocked));
        };
        tracing::debug!("Received: {}", resp);

        self.hosts.push(resp.mapped_addr);

        if resp.server_addr != self.server {
            return Err(DiscoveryError::AddrNotMatch);
        }

        // CHANGED-ADDRESS is RFC 3489 only; RFC 5780 servers send OTHER-ADDRESS
        let alternate = resp.alternate_addr().ok_or(DiscoveryError::NoOtherAddr)?;

        Ok(Transition::Next(Step::CrossAddress {
            identical: resp.identical,
            mapped: resp.mapped_addr,
            alternate,
        }))
    }

    async fn cross_address(
        &mut self,
        identical: bool,
        mapped: Host,
        alternate: Host,
    ) -> Result<Transition, DiscoveryError> {
        tracing::debug!("Do Test2");
        tracing::debug!("Send To: {}", self.server);
        let resp = self.prober.test2(self.server).await?;

        if let Some(resp) = &resp {
            tracing::debug!("Received: {}", resp);
            // Both IP and port must have changed
            if resp.server_addr.ip() == self.server.ip()
                || resp.server_addr.port() == self.server.port()
            {
                return Err(DiscoveryError::AddrNotMatch);
            }
        }

        let leaf = match (identical, resp.is_some()) {
            (true, false) => NatType::SymmetricUdpFirewall,
            (true, true) => NatType::None,
            (false, true) => NatType::Full,
            (false, false) => {
                return Ok(Transition::Next(Step::MappingStability { mapped, alternate }));
            }
        };
        Ok(Transition::Leaf(leaf))
    }

    async fn mapping_stability(
        &mut self,
        mapped: Host,
        alternate: Host,
    ) -> Result<Transition, DiscoveryError> {
        tracing::debug!("Do Test1");
        tracing::debug!("Send To: {}", alternate);
        let Some(resp) = self.prober.test1(alternate).await? else {
            // Test I already reached the primary address
            tracing::warn!(
                "No response from alternate address {} after primary {} answered",
                alternate,
                self.server
            );
            return Ok(Transition::Leaf(NatType::Unknown));
        };
        tracing::debug!("Received: {}", resp);

        if resp.server_addr != alternate {
            return Err(DiscoveryError::AddrNotMatch);
        }

        if resp.mapped_addr == mapped {
            return Ok(Transition::Next(Step::PortFiltering { alternate }));
        }

        self.hosts.push(resp.mapped_addr);
        Ok(Transition::Leaf(NatType::Symmetric))
    }

    async fn port_filtering(&mut self, alternate: Host) -> Result<Transition, DiscoveryError> {
        tracing::debug!("Do Test3");
        tracing::debug!("Send To: {}", alternate);
        let Some(resp) = self.prober.test3(alternate).await? else {
            return Ok(Transition::Leaf(NatType::PortRestricted));
        };
        tracing::debug!("Received: {}", resp);

        // Same IP, different port
        if resp.server_addr.ip() != alternate.ip() || resp.server_addr.port() == alternate.port() {
            return Err(DiscoveryError::AddrNotMatch);
        }

        Ok(Transition::Leaf(NatType::Restricted))
    }
}

/// Classify the NAT between the prober's socket and `server`
///
/// Probes are issued sequentially and the run stops at the first flowchart
/// leaf. No timeout is applied here; wrap the future to impose a deadline.
pub async fn classify<P: Prober>(prober: &P, server: Host) -> Classification {
    let mut run = Run {
        prober,
        server,
        hosts: Vec::with_capacity(2),
    };

    let mut step = Step::Baseline;
    loop {
        match run.advance(step).await {
            Ok(Transition::Next(next)) => step = next,
            Ok(Transition::Leaf(nat_type)) => {
                tracing::debug!("Classified as {} via {:?}", nat_type, step);
                return Classification::leaf(nat_type, run.hosts);
            }
            Err(err) => {
                tracing::debug!("Classification aborted at {:?}: {}", step, err);
                return Classification::failed(run.hosts, err);
            }
        }
    }
}
