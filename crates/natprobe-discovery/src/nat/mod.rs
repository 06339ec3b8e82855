//! NAT Discovery Module
//!
//! Determines the NAT topology a host sits behind by exchanging STUN Binding
//! Requests with a public STUN server, following the discovery process of
//! RFC 3489 Section 10.1.
//!
//! # Components
//!
//! - **STUN Codec**: Binding Request/Response encoding (RFC 5389) including
//!   CHANGE-REQUEST, CHANGED-ADDRESS and OTHER-ADDRESS
//! - **Probes**: Test I / II / III behind the [`Prober`] trait, with a UDP
//!   implementation that handles retransmission
//! - **Classifier**: the flowchart as an explicit state machine
//! - **Detector**: resolves the server, binds a socket and runs the classifier
//!
//! # NAT Types
//!
//! - **Open Internet**: No NAT, no filtering
//! - **Full Cone**: Any external host can send packets to the mapped port
//! - **Restricted Cone**: Only contacted IPs can send back
//! - **Port Restricted Cone**: Only contacted IP:port pairs can send back
//! - **Symmetric**: Different external mapping for each destination
//! - **Symmetric UDP Firewall**: Public address, but unsolicited replies are filtered
//! - **Blocked**: No STUN traffic gets through at all
//!
//! # Example
//!
//! ```rust,no_run
//! use natprobe_discovery::nat::{NatDetector, classify, UdpProber};
//! use tokio::net::UdpSocket;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = UdpSocket::bind("0.0.0.0:0").await?;
//! let server = "203.0.113.1:3478".parse::<std::net::SocketAddr>()?;
//!
//! let prober = UdpProber::new(&socket);
//! let classification = classify(&prober, server.into()).await;
//! println!("NAT type: {}", classification.nat_type);
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod host;
pub mod probe;
pub mod stun;
pub mod types;

// Re-exports
pub use classify::{Classification, DiscoveryError, classify};
pub use host::Host;
pub use probe::{ChangeRequest, ProbeError, ProbeResponse, Prober, RetransmitPolicy, UdpProber};
pub use stun::{StunAttribute, StunError, StunMessage, StunMessageClass, StunMessageType};
pub use types::{DetectorConfig, NatDetector, NatType};
