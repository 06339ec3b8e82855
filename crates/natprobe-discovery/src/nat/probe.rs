//! STUN probe primitives
//!
//! A probe sends one Binding Request to a destination and waits for the
//! correlated response. The classifier only sees the [`Prober`] trait, so the
//! decision logic can be driven by a scripted implementation in tests while
//! [`UdpProber`] does the real network work.

use super::host::Host;
use super::stun::{StunAttribute, StunError, StunMessage, StunMessageClass};
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;

/// Receive buffer size; Binding responses are far smaller
const MAX_PACKET_SIZE: usize = 1024;

/// CHANGE-REQUEST variant carried by a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeRequest {
    /// Plain Binding Request (Test I)
    #[default]
    None,
    /// Respond from the alternate IP and alternate port (Test II)
    IpAndPort,
    /// Respond from the same IP but the alternate port (Test III)
    Port,
}

impl ChangeRequest {
    fn attribute(self) -> Option<StunAttribute> {
        match self {
            Self::None => None,
            Self::IpAndPort => Some(StunAttribute::ChangeRequest {
                change_ip: true,
                change_port: true,
            }),
            Self::Port => Some(StunAttribute::ChangeRequest {
                change_ip: false,
                change_port: true,
            }),
        }
    }
}

/// Parsed outcome of one Binding Request/Response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    /// Client address as observed by the server
    pub mapped_addr: Host,
    /// Address the response actually arrived from
    pub server_addr: Host,
    /// Server alternate address from CHANGED-ADDRESS (RFC 3489)
    pub changed_addr: Option<Host>,
    /// Server alternate address from OTHER-ADDRESS (RFC 5780)
    pub other_addr: Option<Host>,
    /// Mapped address equals the client's local socket address
    pub identical: bool,
}

impl ProbeResponse {
    /// Build a response from a decoded success message
    ///
    /// `server` is the datagram's source and `local` the client's own
    /// address (with a concrete IP) used to compute `identical`.
    ///
    /// # Errors
    ///
    /// Returns `ProbeError::ErrorResponse` for STUN error responses and
    /// `ProbeError::Stun` if the message is not a success response or
    /// carries no mapped address.
    pub fn from_message(
        message: &StunMessage,
        server: SocketAddr,
        local: SocketAddr,
    ) -> Result<Self, ProbeError> {
        match message.message_class {
            StunMessageClass::SuccessResponse => {}
            StunMessageClass::ErrorResponse => {
                let (code, reason) = message
                    .error_code()
                    .map(|(code, reason)| (code, reason.to_string()))
                    .unwrap_or_else(|| (0, "no ERROR-CODE attribute".to_string()));
                return Err(ProbeError::ErrorResponse { code, reason });
            }
            class => return Err(StunError::UnexpectedClass(class).into()),
        }

        let mapped_addr = Host::from(message.mapped_address().ok_or(StunError::MissingAttribute)?);

        Ok(Self {
            mapped_addr,
            server_addr: Host::from(server),
            changed_addr: message.changed_address().map(Host::from),
            other_addr: message.other_address().map(Host::from),
            identical: mapped_addr == Host::from(local),
        })
    }

    /// The server's alternate address, CHANGED-ADDRESS first, OTHER-ADDRESS second
    #[must_use]
    pub fn alternate_addr(&self) -> Option<Host> {
        self.changed_addr.or(self.other_addr)
    }
}

impl fmt::Display for ProbeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mapped={} server={} identical={}",
            self.mapped_addr, self.server_addr, self.identical
        )?;
        if let Some(changed) = self.changed_addr {
            write!(f, " changed={changed}")?;
        }
        if let Some(other) = self.other_addr {
            write!(f, " other={other}")?;
        }
        Ok(())
    }
}

/// Transport-level probe failure
///
/// A timeout is not an error: probes report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Socket I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Datagram could not be decoded or lacks required attributes
    #[error("invalid STUN response: {0}")]
    Stun(#[from] StunError),

    /// Server answered with a STUN error response
    #[error("STUN error response {code}: {reason}")]
    ErrorResponse {
        /// ERROR-CODE value (0 if the attribute was missing)
        code: u16,
        /// Reason phrase
        reason: String,
    },
}

/// Send-and-await-one-correlated-response capability
///
/// Implementations send exactly one logical Binding Request per call (any
/// retransmission is internal) and return `Ok(None)` once their own bounded
/// wait expires without a response.
pub trait Prober: Sync {
    /// Send a Binding Request with the given CHANGE-REQUEST to `dest`
    fn probe(
        &self,
        dest: Host,
        change: ChangeRequest,
    ) -> impl Future<Output = Result<Option<ProbeResponse>, ProbeError>> + Send;

    /// Test I: plain Binding Request
    fn test1(
        &self,
        dest: Host,
    ) -> impl Future<Output = Result<Option<ProbeResponse>, ProbeError>> + Send {
        self.probe(dest, ChangeRequest::None)
    }

    /// Test II: ask the server to respond from a different IP and port
    fn test2(
        &self,
        dest: Host,
    ) -> impl Future<Output = Result<Option<ProbeResponse>, ProbeError>> + Send {
        self.probe(dest, ChangeRequest::IpAndPort)
    }

    /// Test III: ask the server to respond from the same IP but a different port
    fn test3(
        &self,
        dest: Host,
    ) -> impl Future<Output = Result<Option<ProbeResponse>, ProbeError>> + Send {
        self.probe(dest, ChangeRequest::Port)
    }
}

/// Retransmission schedule for one probe
///
/// The request is sent up to `max_transmissions` times; the wait after each
/// send starts at `initial_rto` and doubles up to `max_rto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitPolicy {
    /// Wait after the first transmission
    pub initial_rto: Duration,
    /// Upper bound for a single wait
    pub max_rto: Duration,
    /// Total number of transmissions
    pub max_transmissions: u32,
}

impl RetransmitPolicy {
    /// Per-transmission waits in order
    pub fn timeouts(&self) -> impl Iterator<Item = Duration> + use<> {
        let max_rto = self.max_rto;
        std::iter::successors(Some(self.initial_rto.min(max_rto)), move |rto| {
            Some(rto.saturating_mul(2).min(max_rto))
        })
        .take(self.max_transmissions as usize)
    }

    /// Longest time a probe can wait before reporting no response
    #[must_use]
    pub fn total_wait(&self) -> Duration {
        self.timeouts().sum()
    }
}

impl Default for RetransmitPolicy {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_millis(100),
            max_rto: Duration::from_millis(1600),
            max_transmissions: 9,
        }
    }
}

/// Probe implementation over a caller-owned UDP socket
///
/// The socket must not be read by anyone else while probes run: responses
/// are matched by transaction ID and anything else arriving is discarded.
pub struct UdpProber<'a> {
    socket: &'a UdpSocket,
    policy: RetransmitPolicy,
    software: Option<String>,
}

impl<'a> UdpProber<'a> {
    /// Create a prober with the default retransmission policy
    #[must_use]
    pub fn new(socket: &'a UdpSocket) -> Self {
        Self {
            socket,
            policy: RetransmitPolicy::default(),
            software: None,
        }
    }

    /// Set the retransmission policy
    #[must_use]
    pub fn with_policy(mut self, policy: RetransmitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Advertise a SOFTWARE attribute in every request
    #[must_use]
    pub fn with_software(mut self, software: Option<String>) -> Self {
        self.software = software;
        self
    }

    fn build_request(&self, change: ChangeRequest) -> StunMessage {
        let mut request = StunMessage::binding_request();
        if let Some(attr) = change.attribute() {
            request.add_attribute(attr);
        }
        if let Some(software) = &self.software {
            request.add_attribute(StunAttribute::Software(software.clone()));
        }
        request.add_fingerprint();
        request
    }

    /// Local address with a concrete IP
    ///
    /// A socket bound to the unspecified address reports `0.0.0.0`; the
    /// interface the kernel would route `dest` through is used instead.
    async fn local_addr_toward(&self, dest: SocketAddr) -> Result<SocketAddr, ProbeError> {
        let local = self.socket.local_addr()?;
        if !local.ip().is_unspecified() {
            return Ok(local);
        }

        let unspecified: IpAddr = if dest.is_ipv4() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            Ipv6Addr::UNSPECIFIED.into()
        };
        let route = UdpSocket::bind(SocketAddr::new(unspecified, 0)).await?;
        route.connect(dest).await?;
        Ok(SocketAddr::new(route.local_addr()?.ip(), local.port()))
    }

    /// Send `request` to `dest` until a correlated response arrives or the
    /// retransmission schedule is exhausted
    async fn exchange(
        &self,
        request: &StunMessage,
        dest: SocketAddr,
    ) -> Result<Option<(StunMessage, SocketAddr)>, ProbeError> {
        let bytes = request.encode();
        let mut buf = [0u8; MAX_PACKET_SIZE];

        for (attempt, rto) in self.policy.timeouts().enumerate() {
            self.socket.send_to(&bytes, dest).await?;
            tracing::trace!(
                "Sent binding request {} to {} (attempt {}, waiting {:?})",
                hex::encode(request.transaction_id),
                dest,
                attempt + 1,
                rto
            );

            let deadline = Instant::now() + rto;
            loop {
                let (len, from) =
                    match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await
                    {
                        Ok(received) => received?,
                        Err(_elapsed) => break,
                    };

                let response = match StunMessage::decode(&buf[..len]) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::trace!("Ignoring {} byte datagram from {}: {}", len, from, e);
                        continue;
                    }
                };
                if response.transaction_id != request.transaction_id {
                    tracing::trace!(
                        "Ignoring response {} from {} (stale transaction)",
                        hex::encode(response.transaction_id),
                        from
                    );
                    continue;
                }

                return Ok(Some((response, from)));
            }
        }

        Ok(None)
    }
}

impl Prober for UdpProber<'_> {
    async fn probe(
        &self,
        dest: Host,
        change: ChangeRequest,
    ) -> Result<Option<ProbeResponse>, ProbeError> {
        let dest = dest.socket_addr();
        let request = self.build_request(change);
        tracing::debug!(
            "Probing {} (change: {:?}, transaction {})",
            dest,
            change,
            hex::encode(request.transaction_id)
        );

        let Some((message, from)) = self.exchange(&request, dest).await? else {
            tracing::debug!(
                "No response from {} after {:?}",
                dest,
                self.policy.total_wait()
            );
            return Ok(None);
        };

        let local = self.local_addr_toward(dest).await?;
        ProbeResponse::from_message(&message, from, local).map(Some)
    }
}
