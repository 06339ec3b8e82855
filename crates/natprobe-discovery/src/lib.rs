//! # natprobe Discovery
//!
//! NAT type discovery for natprobe.
//!
//! This crate provides:
//! - A STUN message codec (RFC 5389, with the RFC 3489 / RFC 5780 attributes
//!   needed for behavior discovery)
//! - The Test I / Test II / Test III probe primitives over UDP
//! - The RFC 3489 classification state machine
//! - A caller-facing [`NatDetector`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use natprobe_discovery::{NatDetector, NatType};
//!
//! # async fn example() {
//! let detector = NatDetector::with_server("stun.ekiga.net:3478");
//! let classification = detector.discover().await;
//!
//! match classification.into_result() {
//!     Ok((nat_type, hosts)) => println!("{nat_type}: {hosts:?}"),
//!     Err(e) => eprintln!("discovery failed: {e}"),
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod nat;

// Re-export commonly used types
pub use nat::{
    ChangeRequest, Classification, DetectorConfig, DiscoveryError, Host, NatDetector, NatType,
    ProbeError, ProbeResponse, Prober, RetransmitPolicy, StunError, UdpProber, classify,
};
