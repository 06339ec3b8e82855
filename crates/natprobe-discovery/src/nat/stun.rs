//! STUN Protocol Implementation (RFC 5389)
//!
//! Binding Request/Response codec for NAT behavior discovery. Besides the
//! RFC 5389 attributes this understands the classic RFC 3489 attributes the
//! discovery process depends on (CHANGE-REQUEST, CHANGED-ADDRESS) and the
//! RFC 5780 OTHER-ADDRESS that replaces CHANGED-ADDRESS on modern servers.
//!
//! Requests are always built with the RFC 5389 magic cookie; an RFC 3489
//! server echoes the full 128-bit transaction ID back, so responses from
//! either generation decode the same way.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;

/// STUN magic cookie (0x2112A442)
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// STUN message header size (20 bytes)
pub const HEADER_SIZE: usize = 20;

/// XOR constant applied to the FINGERPRINT CRC
const FINGERPRINT_XOR: u32 = 0x5354_554E;

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_CHANGE_REQUEST: u16 = 0x0003;
const ATTR_CHANGED_ADDRESS: u16 = 0x0005;
const ATTR_ERROR_CODE: u16 = 0x0009;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
/// Pre-standard XOR-MAPPED-ADDRESS code still emitted by some servers
const ATTR_XOR_MAPPED_ADDRESS_EXP: u16 = 0x8020;
const ATTR_SOFTWARE: u16 = 0x8022;
const ATTR_FINGERPRINT: u16 = 0x8028;
const ATTR_OTHER_ADDRESS: u16 = 0x802C;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

const CHANGE_IP_FLAG: u32 = 0x04;
const CHANGE_PORT_FLAG: u32 = 0x02;

/// STUN message class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunMessageClass {
    /// Request message
    Request,
    /// Success response
    SuccessResponse,
    /// Error response
    ErrorResponse,
    /// Indication (no response expected)
    Indication,
}

/// STUN message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunMessageType {
    /// Binding request/response
    Binding,
}

impl StunMessageType {
    /// Encode message type and class into a 16-bit value
    ///
    /// RFC 5389 Section 6 encoding:
    /// ```text
    ///  0                 1
    ///  2  3  4 5 6 7 8 9 0 1 2 3 4 5
    /// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
    /// |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
    /// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    fn encode(self, class: StunMessageClass) -> u16 {
        let method = match self {
            Self::Binding => 0x0001,
        };

        let class_bits = match class {
            StunMessageClass::Request => 0b00,
            StunMessageClass::Indication => 0b01,
            StunMessageClass::SuccessResponse => 0b10,
            StunMessageClass::ErrorResponse => 0b11,
        };

        let m0_m3 = method & 0x0F;
        let c0 = (class_bits & 0x01) << 4;
        let m4_m6 = (method & 0x70) << 1;
        let c1 = (class_bits & 0x02) << 7;
        let m7_m11 = (method & 0xF80) << 2;

        m0_m3 | c0 | m4_m6 | c1 | m7_m11
    }
}

/// STUN attribute types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StunAttribute {
    /// Mapped address (0x0001)
    MappedAddress(SocketAddr),
    /// Change request (0x0003) - RFC 3489 / RFC 5780
    ChangeRequest {
        /// Ask the server to respond from its alternate IP
        change_ip: bool,
        /// Ask the server to respond from its alternate port
        change_port: bool,
    },
    /// Changed address (0x0005) - RFC 3489
    ChangedAddress(SocketAddr),
    /// Error code (0x0009)
    ErrorCode {
        /// Numeric code (300-699)
        code: u16,
        /// Reason phrase
        reason: String,
    },
    /// XOR-Mapped address (0x0020, or 0x8020 on older servers)
    XorMappedAddress(SocketAddr),
    /// Software identifier (0x8022)
    Software(String),
    /// Fingerprint (0x8028) - CRC-32
    Fingerprint(u32),
    /// Other address (0x802C) - RFC 5780
    OtherAddress(SocketAddr),
    /// Unknown attribute type
    Unknown(u16, Vec<u8>),
}

impl StunAttribute {
    /// Attribute type code
    fn attr_type(&self) -> u16 {
        match self {
            Self::MappedAddress(_) => ATTR_MAPPED_ADDRESS,
            Self::ChangeRequest { .. } => ATTR_CHANGE_REQUEST,
            Self::ChangedAddress(_) => ATTR_CHANGED_ADDRESS,
            Self::ErrorCode { .. } => ATTR_ERROR_CODE,
            Self::XorMappedAddress(_) => ATTR_XOR_MAPPED_ADDRESS,
            Self::Software(_) => ATTR_SOFTWARE,
            Self::Fingerprint(_) => ATTR_FINGERPRINT,
            Self::OtherAddress(_) => ATTR_OTHER_ADDRESS,
            Self::Unknown(t, _) => *t,
        }
    }

    /// Encode attribute to bytes, padded to a 4-byte boundary
    fn encode(&self, transaction_id: &[u8; 12]) -> Vec<u8> {
        let value = self.encode_value(transaction_id);

        let mut bytes = Vec::with_capacity(4 + value.len() + 3);
        bytes.extend_from_slice(&self.attr_type().to_be_bytes());
        bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&value);

        let padding = (4 - (value.len() % 4)) % 4;
        bytes.extend(std::iter::repeat_n(0, padding));

        bytes
    }

    fn encode_value(&self, transaction_id: &[u8; 12]) -> Vec<u8> {
        match self {
            Self::MappedAddress(addr) | Self::ChangedAddress(addr) | Self::OtherAddress(addr) => {
                encode_address(addr)
            }
            Self::XorMappedAddress(addr) => encode_address(&xor_address(addr, transaction_id)),
            Self::ChangeRequest {
                change_ip,
                change_port,
            } => {
                let mut flags = 0u32;
                if *change_ip {
                    flags |= CHANGE_IP_FLAG;
                }
                if *change_port {
                    flags |= CHANGE_PORT_FLAG;
                }
                flags.to_be_bytes().to_vec()
            }
            Self::ErrorCode { code, reason } => {
                let mut value = vec![0, 0, (code / 100) as u8 & 0x07, (code % 100) as u8];
                value.extend_from_slice(reason.as_bytes());
                value
            }
            Self::Software(s) => s.as_bytes().to_vec(),
            Self::Fingerprint(f) => f.to_be_bytes().to_vec(),
            Self::Unknown(_, data) => data.clone(),
        }
    }

    /// Decode attribute from bytes
    fn decode(attr_type: u16, value: &[u8], transaction_id: &[u8; 12]) -> Result<Self, StunError> {
        match attr_type {
            ATTR_MAPPED_ADDRESS => Ok(Self::MappedAddress(decode_address(value)?)),
            ATTR_CHANGED_ADDRESS => Ok(Self::ChangedAddress(decode_address(value)?)),
            ATTR_OTHER_ADDRESS => Ok(Self::OtherAddress(decode_address(value)?)),
            ATTR_XOR_MAPPED_ADDRESS | ATTR_XOR_MAPPED_ADDRESS_EXP => {
                let addr = decode_address(value)?;
                Ok(Self::XorMappedAddress(xor_address(&addr, transaction_id)))
            }
            ATTR_CHANGE_REQUEST => {
                let raw: [u8; 4] = value.try_into().map_err(|_| StunError::InvalidAttribute)?;
                let flags = u32::from_be_bytes(raw);
                Ok(Self::ChangeRequest {
                    change_ip: flags & CHANGE_IP_FLAG != 0,
                    change_port: flags & CHANGE_PORT_FLAG != 0,
                })
            }
            ATTR_ERROR_CODE => {
                if value.len() < 4 {
                    return Err(StunError::InvalidAttribute);
                }
                let class = u16::from(value[2] & 0x07);
                let number = u16::from(value[3]);
                Ok(Self::ErrorCode {
                    code: class * 100 + number,
                    reason: String::from_utf8_lossy(&value[4..]).to_string(),
                })
            }
            ATTR_SOFTWARE => Ok(Self::Software(String::from_utf8_lossy(value).to_string())),
            ATTR_FINGERPRINT => {
                let raw: [u8; 4] = value.try_into().map_err(|_| StunError::InvalidAttribute)?;
                Ok(Self::Fingerprint(u32::from_be_bytes(raw)))
            }
            _ => Ok(Self::Unknown(attr_type, value.to_vec())),
        }
    }
}

/// Encode the RFC 5389 address value layout (reserved, family, port, address)
fn encode_address(addr: &SocketAddr) -> Vec<u8> {
    let mut value = Vec::with_capacity(20);
    value.push(0); // Reserved
    match addr.ip() {
        IpAddr::V4(ipv4) => {
            value.push(FAMILY_IPV4);
            value.extend_from_slice(&addr.port().to_be_bytes());
            value.extend_from_slice(&ipv4.octets());
        }
        IpAddr::V6(ipv6) => {
            value.push(FAMILY_IPV6);
            value.extend_from_slice(&addr.port().to_be_bytes());
            value.extend_from_slice(&ipv6.octets());
        }
    }
    value
}

fn decode_address(value: &[u8]) -> Result<SocketAddr, StunError> {
    if value.len() < 4 {
        return Err(StunError::InvalidAttribute);
    }

    let port = u16::from_be_bytes([value[2], value[3]]);
    match value[1] {
        FAMILY_IPV4 => {
            let octets: [u8; 4] = value
                .get(4..8)
                .and_then(|b| b.try_into().ok())
                .ok_or(StunError::InvalidAttribute)?;
            Ok(SocketAddr::new(Ipv4Addr::from(octets).into(), port))
        }
        FAMILY_IPV6 => {
            let octets: [u8; 16] = value
                .get(4..20)
                .and_then(|b| b.try_into().ok())
                .ok_or(StunError::InvalidAttribute)?;
            Ok(SocketAddr::new(Ipv6Addr::from(octets).into(), port))
        }
        _ => Err(StunError::InvalidAttribute),
    }
}

/// Apply the XOR-MAPPED-ADDRESS transform (its own inverse)
///
/// Port is XORed with the top 16 bits of the magic cookie, IPv4 with the
/// cookie, IPv6 with the cookie followed by the transaction ID.
fn xor_address(addr: &SocketAddr, transaction_id: &[u8; 12]) -> SocketAddr {
    let port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
    let cookie = MAGIC_COOKIE.to_be_bytes();

    let ip = match addr.ip() {
        IpAddr::V4(ipv4) => {
            let mut octets = ipv4.octets();
            for (b, k) in octets.iter_mut().zip(cookie) {
                *b ^= k;
            }
            IpAddr::V4(octets.into())
        }
        IpAddr::V6(ipv6) => {
            let mut octets = ipv6.octets();
            let key = cookie.iter().chain(transaction_id.iter());
            for (b, k) in octets.iter_mut().zip(key) {
                *b ^= k;
            }
            IpAddr::V6(octets.into())
        }
    };

    SocketAddr::new(ip, port)
}

/// STUN message
#[derive(Debug, Clone)]
pub struct StunMessage {
    /// Message type
    pub message_type: StunMessageType,
    /// Message class
    pub message_class: StunMessageClass,
    /// Transaction ID (96 bits)
    pub transaction_id: [u8; 12],
    /// Message attributes
    pub attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// Create a new STUN Binding Request with a fresh random transaction ID
    #[must_use]
    pub fn binding_request() -> Self {
        let mut transaction_id = [0u8; 12];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut transaction_id);

        Self {
            message_type: StunMessageType::Binding,
            message_class: StunMessageClass::Request,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Create a Binding success response for the given transaction
    #[must_use]
    pub fn binding_response(transaction_id: [u8; 12]) -> Self {
        Self {
            message_type: StunMessageType::Binding,
            message_class: StunMessageClass::SuccessResponse,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Add an attribute to the message
    pub fn add_attribute(&mut self, attr: StunAttribute) {
        self.attributes.push(attr);
    }

    /// Encode message to bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + 64);

        bytes.extend_from_slice(&self.message_type.encode(self.message_class).to_be_bytes());
        // Length placeholder, patched below
        bytes.extend_from_slice(&[0u8; 2]);
        bytes.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        bytes.extend_from_slice(&self.transaction_id);

        for attr in &self.attributes {
            bytes.extend_from_slice(&attr.encode(&self.transaction_id));
        }

        let msg_length = bytes.len() - HEADER_SIZE;
        bytes[2..4].copy_from_slice(&(msg_length as u16).to_be_bytes());

        bytes
    }

    /// Decode message from bytes
    ///
    /// Malformed attributes of known types are skipped. A FINGERPRINT
    /// attribute, when present, must match the preceding bytes.
    ///
    /// # Errors
    ///
    /// Returns `StunError` if the header is truncated or invalid, an attribute
    /// overruns the message, or the FINGERPRINT does not verify.
    pub fn decode(bytes: &[u8]) -> Result<Self, StunError> {
        if bytes.len() < HEADER_SIZE {
            return Err(StunError::MessageTooShort);
        }

        let msg_type = u16::from_be_bytes([bytes[0], bytes[1]]);
        let msg_length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let magic_cookie = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        if magic_cookie != MAGIC_COOKIE {
            return Err(StunError::InvalidMagicCookie);
        }
        if HEADER_SIZE + msg_length > bytes.len() {
            return Err(StunError::MessageTooShort);
        }

        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&bytes[8..20]);

        let (message_type, message_class) = Self::decode_type(msg_type)?;

        let end = HEADER_SIZE + msg_length;
        let mut attributes = Vec::new();
        let mut offset = HEADER_SIZE;

        while offset + 4 <= end {
            let attr_start = offset;
            let attr_type = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            let attr_length = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
            offset += 4;

            if offset + attr_length > end {
                return Err(StunError::InvalidAttribute);
            }

            let attr_value = &bytes[offset..offset + attr_length];
            if let Ok(attr) = StunAttribute::decode(attr_type, attr_value, &transaction_id) {
                if let StunAttribute::Fingerprint(fingerprint) = &attr {
                    if crc32(&bytes[..attr_start]) ^ FINGERPRINT_XOR != *fingerprint {
                        return Err(StunError::FingerprintMismatch);
                    }
                }
                attributes.push(attr);
            }

            offset += attr_length;
            offset += (4 - (attr_length % 4)) % 4;
        }

        Ok(Self {
            message_type,
            message_class,
            transaction_id,
            attributes,
        })
    }

    fn decode_type(msg_type: u16) -> Result<(StunMessageType, StunMessageClass), StunError> {
        // The two most significant bits of every STUN message are zero
        if msg_type & 0xC000 != 0 {
            return Err(StunError::InvalidMessageType);
        }

        let c0 = (msg_type >> 4) & 0x01;
        let c1 = (msg_type >> 8) & 0x01;

        let message_class = match c0 | (c1 << 1) {
            0b00 => StunMessageClass::Request,
            0b01 => StunMessageClass::Indication,
            0b10 => StunMessageClass::SuccessResponse,
            _ => StunMessageClass::ErrorResponse,
        };

        let m0_m3 = msg_type & 0x0F;
        let m4_m6 = (msg_type >> 1) & 0x70;
        let m7_m11 = (msg_type >> 2) & 0xF80;

        let message_type = match m0_m3 | m4_m6 | m7_m11 {
            0x0001 => StunMessageType::Binding,
            _ => return Err(StunError::InvalidMessageType),
        };

        Ok((message_type, message_class))
    }

    /// Get XOR-MAPPED-ADDRESS attribute
    #[must_use]
    pub fn xor_mapped_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|attr| match attr {
            StunAttribute::XorMappedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// Get the client's reflexive address
    ///
    /// XOR-MAPPED-ADDRESS takes precedence over MAPPED-ADDRESS.
    #[must_use]
    pub fn mapped_address(&self) -> Option<SocketAddr> {
        self.xor_mapped_address().or_else(|| {
            self.attributes.iter().find_map(|attr| match attr {
                StunAttribute::MappedAddress(addr) => Some(*addr),
                _ => None,
            })
        })
    }

    /// Get CHANGED-ADDRESS attribute
    #[must_use]
    pub fn changed_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|attr| match attr {
            StunAttribute::ChangedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// Get OTHER-ADDRESS attribute
    #[must_use]
    pub fn other_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|attr| match attr {
            StunAttribute::OtherAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// Get ERROR-CODE attribute as `(code, reason)`
    #[must_use]
    pub fn error_code(&self) -> Option<(u16, &str)> {
        self.attributes.iter().find_map(|attr| match attr {
            StunAttribute::ErrorCode { code, reason } => Some((*code, reason.as_str())),
            _ => None,
        })
    }

    /// Get CHANGE-REQUEST flags as `(change_ip, change_port)`
    ///
    /// A message without the attribute asks for no change.
    #[must_use]
    pub fn change_request(&self) -> (bool, bool) {
        self.attributes
            .iter()
            .find_map(|attr| match attr {
                StunAttribute::ChangeRequest {
                    change_ip,
                    change_port,
                } => Some((*change_ip, *change_port)),
                _ => None,
            })
            .unwrap_or((false, false))
    }

    /// Add FINGERPRINT attribute
    ///
    /// Computes CRC-32 over the message and XORs with 0x5354554e. Must be
    /// the last attribute added before encoding.
    pub fn add_fingerprint(&mut self) {
        self.attributes
            .retain(|attr| !matches!(attr, StunAttribute::Fingerprint(_)));

        let mut bytes = self.encode();

        // Length must already cover the 8-byte FINGERPRINT attribute
        let msg_length = bytes.len() - HEADER_SIZE + 8;
        bytes[2..4].copy_from_slice(&(msg_length as u16).to_be_bytes());

        self.attributes
            .push(StunAttribute::Fingerprint(crc32(&bytes) ^ FINGERPRINT_XOR));
    }
}

/// CRC-32 (ISO-HDLC, reflected polynomial 0xEDB88320) as used by FINGERPRINT
fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// STUN codec errors
#[derive(Debug, Error)]
pub enum StunError {
    /// Message shorter than its header or declared length
    #[error("STUN message too short")]
    MessageTooShort,
    /// Invalid magic cookie
    #[error("Invalid STUN magic cookie")]
    InvalidMagicCookie,
    /// Invalid message type
    #[error("Invalid STUN message type")]
    InvalidMessageType,
    /// Attribute overruns the message
    #[error("Invalid STUN attribute")]
    InvalidAttribute,
    /// Missing required attribute
    #[error("Missing required STUN attribute")]
    MissingAttribute,
    /// Message class not valid in this position (e.g. a request where a response was expected)
    #[error("Unexpected STUN message class: {0:?}")]
    UnexpectedClass(StunMessageClass),
    /// FINGERPRINT does not match the message
    #[error("FINGERPRINT verification failed")]
    FingerprintMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_stun_message_type_encoding() {
        // Binding Request: method=0x0001, class=Request(0b00)
        let encoded = StunMessageType::Binding.encode(StunMessageClass::Request);
        assert_eq!(encoded, 0x0001);

        // Binding Success Response: C1 set (bit 8)
        let encoded = StunMessageType::Binding.encode(StunMessageClass::SuccessResponse);
        assert_eq!(encoded, 0x0101);

        // Binding Error Response: C0 and C1 set
        let encoded = StunMessageType::Binding.encode(StunMessageClass::ErrorResponse);
        assert_eq!(encoded, 0x0111);
    }

    #[test]
    fn test_binding_request_header() {
        let msg = StunMessage::binding_request();
        let encoded = msg.encode();

        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(&encoded[0..2], &[0x00, 0x01]);
        assert_eq!(&encoded[2..4], &[0x00, 0x00]);
        assert_eq!(&encoded[4..8], &MAGIC_COOKIE.to_be_bytes());
        assert_eq!(&encoded[8..20], &msg.transaction_id);
    }

    #[test]
    fn test_binding_requests_use_fresh_transaction_ids() {
        let a = StunMessage::binding_request();
        let b = StunMessage::binding_request();
        assert_ne!(a.transaction_id, b.transaction_id);
    }

    #[test]
    fn test_xor_mapped_address_rfc5769_vector() {
        // RFC 5769 Section 2.2 sample IPv4 response
        let transaction_id = [
            0xb7, 0xe7, 0xa7, 0x01, 0xbc, 0x34, 0xd6, 0x86, 0xfa, 0x87, 0xdf, 0xae,
        ];
        let value = [0x00, 0x01, 0xa1, 0x47, 0xe1, 0x12, 0xa6, 0x43];

        let decoded = StunAttribute::decode(ATTR_XOR_MAPPED_ADDRESS, &value, &transaction_id)
            .unwrap();
        assert_eq!(
            decoded,
            StunAttribute::XorMappedAddress("192.0.2.1:32853".parse().unwrap())
        );
    }

    #[test]
    fn test_xor_mapped_address_ipv6() {
        let addr: SocketAddr = "[2001:db8:1234:5678:11:2233:4455:6677]:32853".parse().unwrap();
        let transaction_id = [
            0xb7, 0xe7, 0xa7, 0x01, 0xbc, 0x34, 0xd6, 0x86, 0xfa, 0x87, 0xdf, 0xae,
        ];

        let encoded = StunAttribute::XorMappedAddress(addr).encode(&transaction_id);
        assert_eq!(encoded.len(), 4 + 20);
        // XORed value must not leak the plain address
        let plain: Ipv6Addr = "2001:db8:1234:5678:11:2233:4455:6677".parse().unwrap();
        assert_ne!(&encoded[8..24], &plain.octets()[..]);

        let decoded =
            StunAttribute::decode(ATTR_XOR_MAPPED_ADDRESS, &encoded[4..], &transaction_id).unwrap();
        assert_eq!(decoded, StunAttribute::XorMappedAddress(addr));
    }

    #[test]
    fn test_legacy_xor_mapped_address_code() {
        let addr: SocketAddr = "198.51.100.7:4000".parse().unwrap();
        let transaction_id = [7u8; 12];
        let encoded = StunAttribute::XorMappedAddress(addr).encode(&transaction_id);

        let decoded =
            StunAttribute::decode(ATTR_XOR_MAPPED_ADDRESS_EXP, &encoded[4..], &transaction_id)
                .unwrap();
        assert_eq!(decoded, StunAttribute::XorMappedAddress(addr));
    }

    #[test]
    fn test_change_request_flags() {
        let transaction_id = [0u8; 12];
        let both = StunAttribute::ChangeRequest {
            change_ip: true,
            change_port: true,
        }
        .encode(&transaction_id);
        assert_eq!(both, vec![0x00, 0x03, 0x00, 0x04, 0x00, 0x00, 0x00, 0x06]);

        let port_only = StunAttribute::ChangeRequest {
            change_ip: false,
            change_port: true,
        }
        .encode(&transaction_id);
        assert_eq!(&port_only[4..], &[0x00, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_change_request_accessor() {
        let mut msg = StunMessage::binding_request();
        assert_eq!(msg.change_request(), (false, false));

        msg.add_attribute(StunAttribute::ChangeRequest {
            change_ip: false,
            change_port: true,
        });
        let decoded = StunMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.change_request(), (false, true));
    }

    #[test]
    fn test_response_address_accessors() {
        let mut msg = StunMessage::binding_response([9u8; 12]);
        msg.add_attribute(StunAttribute::MappedAddress("203.0.113.5:1000".parse().unwrap()));
        msg.add_attribute(StunAttribute::XorMappedAddress("203.0.113.5:2000".parse().unwrap()));
        msg.add_attribute(StunAttribute::ChangedAddress("198.51.100.2:3479".parse().unwrap()));
        msg.add_attribute(StunAttribute::OtherAddress("198.51.100.3:3479".parse().unwrap()));

        let decoded = StunMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.message_class, StunMessageClass::SuccessResponse);
        // XOR-MAPPED-ADDRESS wins over MAPPED-ADDRESS
        assert_eq!(decoded.mapped_address(), Some("203.0.113.5:2000".parse().unwrap()));
        assert_eq!(decoded.changed_address(), Some("198.51.100.2:3479".parse().unwrap()));
        assert_eq!(decoded.other_address(), Some("198.51.100.3:3479".parse().unwrap()));
    }

    #[test]
    fn test_mapped_address_fallback() {
        let mut msg = StunMessage::binding_response([1u8; 12]);
        msg.add_attribute(StunAttribute::MappedAddress("203.0.113.5:1000".parse().unwrap()));

        let decoded = StunMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.mapped_address(), Some("203.0.113.5:1000".parse().unwrap()));
        assert_eq!(decoded.changed_address(), None);
        assert_eq!(decoded.other_address(), None);
    }

    #[test]
    fn test_error_code_attribute() {
        let mut msg = StunMessage::binding_response([3u8; 12]);
        msg.message_class = StunMessageClass::ErrorResponse;
        msg.add_attribute(StunAttribute::ErrorCode {
            code: 420,
            reason: "Unknown Attribute".to_string(),
        });

        let decoded = StunMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.message_class, StunMessageClass::ErrorResponse);
        assert_eq!(decoded.error_code(), Some((420, "Unknown Attribute")));
    }

    #[test]
    fn test_software_attribute_padding() {
        let software = StunAttribute::Software("natprobe".to_string());
        let encoded = software.encode(&[0u8; 12]);
        assert_eq!(encoded.len(), 4 + 8);

        let odd = StunAttribute::Software("natprobe/1".to_string());
        let encoded = odd.encode(&[0u8; 12]);
        assert_eq!(encoded.len(), 4 + 12);
        assert_eq!(encoded.len() % 4, 0);
    }

    #[test]
    fn test_crc32_check_value() {
        // Standard CRC-32 check value
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_fingerprint_verifies_on_decode() {
        let mut msg = StunMessage::binding_request();
        msg.add_attribute(StunAttribute::Software("natprobe".to_string()));
        msg.add_fingerprint();

        let encoded = msg.encode();
        let decoded = StunMessage::decode(&encoded).unwrap();
        assert!(matches!(
            decoded.attributes.last(),
            Some(StunAttribute::Fingerprint(_))
        ));
    }

    #[test]
    fn test_fingerprint_tampered_message() {
        let mut msg = StunMessage::binding_request();
        msg.add_attribute(StunAttribute::Software("natprobe".to_string()));
        msg.add_fingerprint();

        let mut encoded = msg.encode();
        // Flip a byte in the SOFTWARE value
        encoded[HEADER_SIZE + 4] ^= 0xFF;

        let result = StunMessage::decode(&encoded);
        assert!(matches!(result, Err(StunError::FingerprintMismatch)));
    }

    #[test]
    fn test_decode_error_too_short() {
        let result = StunMessage::decode(&[0u8; 10]);
        assert!(matches!(result, Err(StunError::MessageTooShort)));
    }

    #[test]
    fn test_decode_error_declared_length_overruns() {
        let mut encoded = StunMessage::binding_request().encode();
        encoded[2..4].copy_from_slice(&8u16.to_be_bytes());
        let result = StunMessage::decode(&encoded);
        assert!(matches!(result, Err(StunError::MessageTooShort)));
    }

    #[test]
    fn test_decode_error_invalid_magic_cookie() {
        let mut msg = vec![0u8; 20];
        msg[4..8].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        let result = StunMessage::decode(&msg);
        assert!(matches!(result, Err(StunError::InvalidMagicCookie)));
    }

    #[test]
    fn test_decode_error_non_binding_method() {
        let mut encoded = StunMessage::binding_request().encode();
        // Allocate (0x0003) is a TURN method
        encoded[0..2].copy_from_slice(&0x0003u16.to_be_bytes());
        let result = StunMessage::decode(&encoded);
        assert!(matches!(result, Err(StunError::InvalidMessageType)));
    }

    #[test]
    fn test_decode_error_attribute_overrun() {
        let mut msg = StunMessage::binding_response([0u8; 12]);
        msg.add_attribute(StunAttribute::Software("abcd".to_string()));
        let mut encoded = msg.encode();
        // Declare a longer value than the message holds
        encoded[HEADER_SIZE + 2..HEADER_SIZE + 4].copy_from_slice(&64u16.to_be_bytes());
        let result = StunMessage::decode(&encoded);
        assert!(matches!(result, Err(StunError::InvalidAttribute)));
    }

    #[test]
    fn test_unknown_attribute_preserved() {
        let mut msg = StunMessage::binding_response([0u8; 12]);
        msg.add_attribute(StunAttribute::Unknown(0x9999, vec![1, 2, 3]));

        let decoded = StunMessage::decode(&msg.encode()).unwrap();
        assert_eq!(
            decoded.attributes,
            vec![StunAttribute::Unknown(0x9999, vec![1, 2, 3])]
        );
    }

    #[test]
    fn test_stun_error_display() {
        let errors = vec![
            (StunError::MessageTooShort, "STUN message too short"),
            (StunError::InvalidMagicCookie, "Invalid STUN magic cookie"),
            (StunError::InvalidMessageType, "Invalid STUN message type"),
            (StunError::InvalidAttribute, "Invalid STUN attribute"),
            (StunError::MissingAttribute, "Missing required STUN attribute"),
            (StunError::FingerprintMismatch, "FINGERPRINT verification failed"),
        ];

        for (err, expected_msg) in errors {
            assert_eq!(err.to_string(), expected_msg);
        }
    }

    proptest! {
        /// Arbitrary datagrams never panic the decoder
        #[test]
        fn decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = StunMessage::decode(&bytes);
        }

        /// Any header with a valid cookie and length decodes attributes without panicking
        #[test]
        fn decode_arbitrary_attributes(body in prop::collection::vec(any::<u8>(), 0..128)) {
            let mut bytes = StunMessage::binding_response([5u8; 12]).encode();
            bytes[2..4].copy_from_slice(&(body.len() as u16).to_be_bytes());
            bytes.extend_from_slice(&body);
            let _ = StunMessage::decode(&bytes);
        }
    }
}
