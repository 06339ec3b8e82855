//! NAT Type Detection
//!
//! The NAT type taxonomy and the caller-facing detector that resolves the
//! STUN server, binds a socket and runs the classifier.

use super::classify::{Classification, DiscoveryError, classify};
use super::host::Host;
use super::probe::{RetransmitPolicy, UdpProber};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Default public STUN server
///
/// Must honor CHANGE-REQUEST and advertise CHANGED-ADDRESS; binding-only
/// servers end every run in `NoOtherAddr`.
pub const DEFAULT_STUN_SERVER: &str = "stun.ekiga.net:3478";

/// Default SOFTWARE attribute value
pub const DEFAULT_SOFTWARE: &str = concat!("natprobe/", env!("CARGO_PKG_VERSION"));

/// NAT type classification
///
/// Every variant except `Error` and `Unknown` is a leaf of the RFC 3489
/// discovery flowchart. Traversal difficulty grows roughly in this order:
/// - None / Full Cone: any external host can reach the mapping
/// - Restricted / Port Restricted: hole punching with simultaneous open
/// - Symmetric: mapping changes per destination, relay usually required
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatType {
    /// Discovery failed with a known cause
    Error,
    /// Discovery ended without reaching a definitive leaf
    Unknown,
    /// UDP to the STUN server is blocked
    Blocked,
    /// Not behind a NAT (open Internet)
    None,
    /// Full Cone NAT - any external host can send to the mapped port
    Full,
    /// Symmetric NAT - different mapping per destination
    Symmetric,
    /// Public address, but replies from unsolicited endpoints are filtered
    SymmetricUdpFirewall,
    /// Restricted Cone NAT - only contacted IPs can send
    Restricted,
    /// Port Restricted Cone NAT - only contacted IP:port can send
    PortRestricted,
}

impl NatType {
    /// Whether the mapping is endpoint independent (one of the cone types)
    #[must_use]
    pub const fn is_cone(self) -> bool {
        matches!(self, Self::Full | Self::Restricted | Self::PortRestricted)
    }

    /// Whether discovery failed
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }

    /// Whether discovery reached a flowchart leaf
    #[must_use]
    pub const fn is_definitive(self) -> bool {
        !matches!(self, Self::Error | Self::Unknown)
    }
}

impl std::fmt::Display for NatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "NAT Error"),
            Self::Unknown => write!(f, "Unknown NAT Type"),
            Self::Blocked => write!(f, "UDP Blocked"),
            Self::None => write!(f, "Open Internet (No NAT)"),
            Self::Full => write!(f, "Full Cone NAT"),
            Self::Symmetric => write!(f, "Symmetric NAT"),
            Self::SymmetricUdpFirewall => write!(f, "Symmetric UDP Firewall"),
            Self::Restricted => write!(f, "Restricted Cone NAT"),
            Self::PortRestricted => write!(f, "Port Restricted Cone NAT"),
        }
    }
}

/// Detector settings
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// STUN server as `host:port`
    pub server: String,
    /// Local address to bind the probe socket to
    pub bind_addr: SocketAddr,
    /// SOFTWARE attribute sent with each request
    pub software: Option<String>,
    /// Per-probe retransmission schedule
    pub retransmit: RetransmitPolicy,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_STUN_SERVER.to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            software: Some(DEFAULT_SOFTWARE.to_string()),
            retransmit: RetransmitPolicy::default(),
        }
    }
}

/// NAT type detector
///
/// Runs one RFC 3489 classification per call against a single STUN server
/// that supports CHANGE-REQUEST.
pub struct NatDetector {
    config: DetectorConfig,
}

impl NatDetector {
    /// Create a detector with the default STUN server
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: DetectorConfig::default(),
        }
    }

    /// Create a detector for a custom STUN server (`host:port`)
    #[must_use]
    pub fn with_server(server: impl Into<String>) -> Self {
        Self {
            config: DetectorConfig {
                server: server.into(),
                ..DetectorConfig::default()
            },
        }
    }

    /// Create a detector from full settings
    #[must_use]
    pub fn with_config(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Current settings
    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Resolve the server, bind a socket and classify
    ///
    /// Resolution and bind failures are reported as a classification with
    /// [`NatType::Error`] and no hosts.
    pub async fn discover(&self) -> Classification {
        let server = match self.resolve_server().await {
            Ok(server) => server,
            Err(e) => return Classification::failed(Vec::new(), e),
        };

        let socket = match UdpSocket::bind(self.config.bind_addr).await {
            Ok(socket) => socket,
            Err(e) => return Classification::failed(Vec::new(), e.into()),
        };

        self.discover_with_socket(&socket, server).await
    }

    /// Classify using a caller-owned socket and an already resolved server
    ///
    /// The socket must not be read concurrently while this runs.
    pub async fn discover_with_socket(
        &self,
        socket: &UdpSocket,
        server: SocketAddr,
    ) -> Classification {
        if let Ok(local) = socket.local_addr() {
            tracing::debug!("Discovering NAT type from {} via {}", local, server);
        }

        let prober = UdpProber::new(socket)
            .with_policy(self.config.retransmit)
            .with_software(self.config.software.clone());

        let classification = classify(&prober, Host::from(server)).await;

        match &classification.error {
            None => tracing::info!(
                "NAT type: {} (external: [{}])",
                classification.nat_type,
                classification
                    .hosts
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Some(e) => tracing::warn!("NAT discovery failed: {}", e),
        }

        classification
    }

    /// Resolve the configured server, preferring the bind address family
    async fn resolve_server(&self) -> Result<SocketAddr, DiscoveryError> {
        let server = &self.config.server;
        let resolve_err = |source| DiscoveryError::Resolve {
            server: server.clone(),
            source,
        };

        let addrs = tokio::net::lookup_host(server.as_str())
            .await
            .map_err(resolve_err)?;

        let want_ipv4 = self.config.bind_addr.is_ipv4();
        let mut fallback = None;
        for addr in addrs {
            if addr.is_ipv4() == want_ipv4 {
                return Ok(addr);
            }
            fallback.get_or_insert(addr);
        }

        fallback.ok_or_else(|| {
            resolve_err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no addresses returned",
            ))
        })
    }
}

impl Default for NatDetector {
    fn default() -> Self {
        Self::new()
    }
}
