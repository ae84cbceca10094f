//! IPv4 framing of RECIPE packets.
//!
//! A RECIPE packet is a bare 20-byte IPv4 header (IHL 5, DF set, protocol
//! 146) optionally followed by the 3-byte coded-symbol header. There is no
//! presence flag on the wire: the header is present exactly when
//! `total_len` is 23. All multi-byte fields are big-endian.
//!
//! ```text
//!  0       4       8               16              24              32
//! +-------+-------+---------------+-------------------------------+
//! |Ver=4  |IHL=5  |     TOS       |          total_len            |
//! +-------+-------+---------------+-------------------------------+
//! |        identification         |  flags=DF  |  fragment off    |
//! +---------------+---------------+-------------------------------+
//! |      TTL      | protocol=146  |        header checksum        |
//! +---------------+---------------+-------------------------------+
//! |                        source address                         |
//! +---------------------------------------------------------------+
//! |                     destination address                       |
//! +-------------------------------+---------------+---------------+
//! |          symbol (opt)         |  degree (opt) |
//! +-------------------------------+---------------+
//! ```

use crate::error::WireError;
use crate::fingerprint::PacketIdentity;
use crate::header::{CodedSymbol, RECIPE_HEADER_SIZE};
use crate::hop_count::HopCount;
use crate::{IPV4_HEADER_SIZE, MAX_TTL, RECIPE_PROTOCOL};
use std::net::{IpAddr, Ipv4Addr};

/// Don't-fragment flag in the flags/fragment-offset word
const FLAG_DONT_FRAGMENT: u16 = 0x4000;

/// Size of a packet carrying the coded-symbol header
pub const RECIPE_PACKET_SIZE: usize = IPV4_HEADER_SIZE + RECIPE_HEADER_SIZE;

/// RFC 1071 ones' complement checksum over `data`.
///
/// Over a header whose checksum field is already filled in, a valid
/// header yields zero.
#[must_use]
pub fn ipv4_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|w| match *w {
            [hi, lo] => u32::from(u16::from_be_bytes([hi, lo])),
            [hi] => u32::from(hi) << 8,
            _ => 0,
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    #[allow(clippy::cast_possible_truncation)]
    let folded = sum as u16;
    !folded
}

/// One RECIPE datagram as exchanged between the driver and a hop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipePacket {
    /// Packet identity (addresses, protocol, identification)
    pub identity: PacketIdentity,
    /// Remaining TTL
    pub ttl: u8,
    /// Coded-symbol header, absent before the first hop
    pub header: Option<CodedSymbol>,
}

impl RecipePacket {
    /// Fresh packet: full TTL, no coded-symbol header
    #[must_use]
    pub const fn new(identity: PacketIdentity) -> Self {
        Self {
            identity,
            ttl: MAX_TTL,
            header: None,
        }
    }

    /// Set the remaining TTL
    #[must_use]
    pub const fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Attach a coded-symbol header
    #[must_use]
    pub const fn with_header(mut self, header: CodedSymbol) -> Self {
        self.header = Some(header);
        self
    }

    /// Hop count implied by the remaining TTL
    #[must_use]
    pub const fn hop_count(&self) -> HopCount {
        HopCount::from_ttl(self.ttl)
    }

    /// Length on the wire
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        match self.header {
            Some(_) => RECIPE_PACKET_SIZE,
            None => IPV4_HEADER_SIZE,
        }
    }

    /// Parse a datagram. Bytes past `total_len` are ignored.
    ///
    /// # Errors
    ///
    /// Returns a `WireError` if the datagram is not a well-formed RECIPE
    /// packet.
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < IPV4_HEADER_SIZE {
            return Err(WireError::TooShort {
                expected: IPV4_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let version = data[0] >> 4;
        if version != 4 {
            return Err(WireError::NotIpv4(version));
        }
        let ihl = data[0] & 0x0F;
        if usize::from(ihl) * 4 != IPV4_HEADER_SIZE {
            return Err(WireError::BadHeaderLength(ihl));
        }
        let protocol = data[9];
        if protocol != RECIPE_PROTOCOL {
            return Err(WireError::UnexpectedProtocol(protocol));
        }
        if ipv4_checksum(&data[..IPV4_HEADER_SIZE]) != 0 {
            return Err(WireError::ChecksumMismatch);
        }

        let total_len = u16::from_be_bytes([data[2], data[3]]);
        let header = match usize::from(total_len) {
            IPV4_HEADER_SIZE => None,
            RECIPE_PACKET_SIZE if data.len() >= RECIPE_PACKET_SIZE => {
                Some(CodedSymbol::from_bytes([data[20], data[21], data[22]]))
            }
            _ => {
                return Err(WireError::MalformedHeader {
                    declared: total_len,
                    actual: data.len(),
                });
            }
        };

        let id = u16::from_be_bytes([data[4], data[5]]);
        let ttl = data[8];
        let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
        let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);

        Ok(Self {
            identity: PacketIdentity::new(IpAddr::V4(src), IpAddr::V4(dst), protocol, id),
            ttl,
            header,
        })
    }

    /// Encode with a freshly computed checksum
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAddressFamily` for IPv6 identities.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let (IpAddr::V4(src), IpAddr::V4(dst)) = (self.identity.src, self.identity.dst) else {
            return Err(WireError::UnsupportedAddressFamily);
        };

        let total_len = u16::try_from(self.encoded_len()).unwrap_or(u16::MAX);
        let mut buf = Vec::with_capacity(self.encoded_len());

        buf.push(0x45);
        buf.push(0); // TOS
        buf.extend_from_slice(&total_len.to_be_bytes());
        buf.extend_from_slice(&self.identity.id.to_be_bytes());
        buf.extend_from_slice(&FLAG_DONT_FRAGMENT.to_be_bytes());
        buf.push(self.ttl);
        buf.push(self.identity.protocol);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&src.octets());
        buf.extend_from_slice(&dst.octets());

        let checksum = ipv4_checksum(&buf[..IPV4_HEADER_SIZE]);
        buf[10..12].copy_from_slice(&checksum.to_be_bytes());

        if let Some(header) = self.header {
            buf.extend_from_slice(&header.to_bytes());
        }

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> PacketIdentity {
        PacketIdentity::v4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 7)
    }

    #[test]
    fn test_checksum_rfc1071_example() {
        // Widely used IPv4 checksum example
        let header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(ipv4_checksum(&header), 0xb861);
    }

    #[test]
    fn test_packet_without_header() {
        let packet = RecipePacket::new(identity());
        let bytes = packet.encode().unwrap();

        assert_eq!(bytes.len(), IPV4_HEADER_SIZE);
        assert_eq!(bytes[0], 0x45);
        assert_eq!(&bytes[2..4], &[0, 20]);
        assert_eq!(&bytes[4..6], &[0, 7]);
        assert_eq!(&bytes[6..8], &[0x40, 0x00]);
        assert_eq!(bytes[8], 255);
        assert_eq!(bytes[9], 146);
        assert_eq!(ipv4_checksum(&bytes), 0);

        let parsed = RecipePacket::parse(&bytes).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(parsed.hop_count(), HopCount::ZERO);
    }

    #[test]
    fn test_packet_with_header() {
        let packet = RecipePacket::new(identity())
            .with_ttl(250)
            .with_header(CodedSymbol::new(0x0102, 3));
        let bytes = packet.encode().unwrap();

        assert_eq!(bytes.len(), RECIPE_PACKET_SIZE);
        assert_eq!(&bytes[2..4], &[0, 23]);
        assert_eq!(&bytes[20..23], &[0x01, 0x02, 3]);

        let parsed = RecipePacket::parse(&bytes).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(parsed.hop_count(), HopCount::new(5));
    }

    #[test]
    fn test_trailing_padding_ignored() {
        let mut bytes = RecipePacket::new(identity()).encode().unwrap();
        bytes.extend_from_slice(&[0xAA; 6]);
        assert_eq!(RecipePacket::parse(&bytes).unwrap().header, None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            RecipePacket::parse(&[0u8; 10]),
            Err(WireError::TooShort { expected: 20, actual: 10 })
        ));

        let good = RecipePacket::new(identity()).encode().unwrap();

        let mut v6 = good.clone();
        v6[0] = 0x65;
        assert_eq!(RecipePacket::parse(&v6), Err(WireError::NotIpv4(6)));

        let mut ihl = good.clone();
        ihl[0] = 0x46;
        assert_eq!(RecipePacket::parse(&ihl), Err(WireError::BadHeaderLength(6)));

        let mut proto = good.clone();
        proto[9] = 17;
        assert_eq!(RecipePacket::parse(&proto), Err(WireError::UnexpectedProtocol(17)));

        let mut corrupt = good.clone();
        corrupt[8] = 1;
        assert_eq!(RecipePacket::parse(&corrupt), Err(WireError::ChecksumMismatch));
    }

    #[test]
    fn test_truncated_header_is_malformed() {
        let bytes = RecipePacket::new(identity())
            .with_header(CodedSymbol::new(1, 1))
            .encode()
            .unwrap();
        assert_eq!(
            RecipePacket::parse(&bytes[..21]),
            Err(WireError::MalformedHeader {
                declared: 23,
                actual: 21
            })
        );
    }

    #[test]
    fn test_ipv6_identity_rejected() {
        let identity = PacketIdentity::new(
            "::1".parse().unwrap(),
            "::2".parse().unwrap(),
            RECIPE_PROTOCOL,
            1,
        );
        assert_eq!(
            RecipePacket::new(identity).encode(),
            Err(WireError::UnsupportedAddressFamily)
        );
    }

    proptest::proptest! {
        #[test]
        fn prop_parse_never_panics(data in proptest::collection::vec(proptest::num::u8::ANY, 0..64)) {
            let _ = RecipePacket::parse(&data);
        }

        #[test]
        fn prop_encoded_header_checksums_to_zero(
            id in proptest::num::u16::ANY,
            ttl in proptest::num::u8::ANY,
            symbol in proptest::num::u16::ANY,
            degree in proptest::num::u8::ANY,
        ) {
            let bytes = RecipePacket::new(identity().with_id(id))
                .with_ttl(ttl)
                .with_header(CodedSymbol::new(symbol, degree))
                .encode()
                .unwrap();
            proptest::prop_assert_eq!(ipv4_checksum(&bytes[..IPV4_HEADER_SIZE]), 0);
        }
    }
}
