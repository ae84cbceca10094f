//! Per-packet, per-hop fingerprints.
//!
//! A fingerprint is the 32-bit pseudo-random value a hop compares against the
//! probability table thresholds. Strategies are selected once at
//! configuration time and shared by every packet:
//!
//! - [`MixHash`]: two-stage integer mixing. A packet key is derived from the
//!   identity alone, then mixed with the hop count. Seeded randomly unless a
//!   seed is pinned.
//! - [`Crc32Hash`]: CRC32 over the identity fields and hop count. Reproducible
//!   across runs and implementations, and uses the computed row offset.
//! - [`PrecomputedHash`]: a provisioned `(packet id, hop)` schedule.

use crate::RECIPE_PROTOCOL;
use crate::error::{DecisionError, TableError};
use crate::hop_count::HopCount;
use crate::table::{DEFAULT_MAX_HOPS, IndexBase};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Immutable per-packet identity tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketIdentity {
    /// Source address
    pub src: IpAddr,
    /// Destination address
    pub dst: IpAddr,
    /// Transport / next-header value
    pub protocol: u8,
    /// Per-packet identification number
    pub id: u16,
}

impl PacketIdentity {
    /// Create an identity
    #[must_use]
    pub const fn new(src: IpAddr, dst: IpAddr, protocol: u8, id: u16) -> Self {
        Self {
            src,
            dst,
            protocol,
            id,
        }
    }

    /// IPv4 identity carrying the RECIPE protocol number
    #[must_use]
    pub const fn v4(src: Ipv4Addr, dst: Ipv4Addr, id: u16) -> Self {
        Self::new(IpAddr::V4(src), IpAddr::V4(dst), RECIPE_PROTOCOL, id)
    }

    /// Same flow, different identification number
    #[must_use]
    pub const fn with_id(self, id: u16) -> Self {
        Self { id, ..self }
    }
}

impl fmt::Display for PacketIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}/{}#{}",
            self.src, self.dst, self.protocol, self.id
        )
    }
}

/// Source of per-hop fingerprints
pub trait FingerprintStrategy: Send + Sync + fmt::Debug {
    /// Fingerprint of `identity` at `hop`. Must be deterministic for a given
    /// strategy instance.
    ///
    /// # Errors
    ///
    /// Returns `DecisionError::FingerprintMiss` when the strategy has no
    /// value for this packet and hop.
    fn fingerprint(&self, identity: &PacketIdentity, hop: HopCount) -> Result<u32, DecisionError>;

    /// Row offset mode the decision engine uses with this strategy
    fn index_base(&self) -> IndexBase;

    /// Short strategy name for logs
    fn name(&self) -> &'static str;
}

/// 32-bit integer finalizer
#[must_use]
pub const fn mix32(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x7FEB_352D);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846C_A68B);
    x ^= x >> 16;
    x
}

/// Combine a packet key with a hop count.
///
/// This is the function the reference fingerprint schedule is generated
/// with.
#[must_use]
pub const fn hop_hash(packet_key: u32, hop: u32) -> u32 {
    mix32(mix32(packet_key) ^ hop.wrapping_mul(0x9E37_79B9) ^ 0xA5A5_A5A5)
}

fn fold_addr(addr: &IpAddr) -> u32 {
    match addr {
        IpAddr::V4(v4) => u32::from(*v4),
        IpAddr::V6(v6) => v6
            .octets()
            .chunks_exact(4)
            .fold(0u32, |acc, w| acc ^ u32::from_be_bytes([w[0], w[1], w[2], w[3]])),
    }
}

/// Pseudo-random mixing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixHash {
    seed: u32,
}

impl MixHash {
    /// Strategy with a pinned seed
    #[must_use]
    pub const fn with_seed(seed: u32) -> Self {
        Self { seed }
    }

    /// Strategy with a fresh random seed
    #[must_use]
    pub fn random() -> Self {
        Self::with_seed(rand::random())
    }

    /// Seed in use
    #[must_use]
    pub const fn seed(&self) -> u32 {
        self.seed
    }

    /// Per-packet key derived from the identity alone
    #[must_use]
    pub fn packet_key(&self, identity: &PacketIdentity) -> u32 {
        let flow = fold_addr(&identity.src).rotate_left(16)
            ^ fold_addr(&identity.dst)
            ^ (u32::from(identity.protocol) << 24);
        mix32(flow ^ self.seed) ^ u32::from(identity.id)
    }
}

impl Default for MixHash {
    fn default() -> Self {
        Self::random()
    }
}

impl FingerprintStrategy for MixHash {
    fn fingerprint(&self, identity: &PacketIdentity, hop: HopCount) -> Result<u32, DecisionError> {
        Ok(hop_hash(self.packet_key(identity), u32::from(hop.get())))
    }

    fn index_base(&self) -> IndexBase {
        IndexBase::Provisioned
    }

    fn name(&self) -> &'static str {
        "mix"
    }
}

/// CRC32 over `{src, dst, protocol, id, hop}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc32Hash;

impl Crc32Hash {
    /// Compute the checksum directly
    #[must_use]
    pub fn checksum(identity: &PacketIdentity, hop: HopCount) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        match identity.src {
            IpAddr::V4(a) => hasher.update(&a.octets()),
            IpAddr::V6(a) => hasher.update(&a.octets()),
        }
        match identity.dst {
            IpAddr::V4(a) => hasher.update(&a.octets()),
            IpAddr::V6(a) => hasher.update(&a.octets()),
        }
        hasher.update(&[identity.protocol]);
        hasher.update(&identity.id.to_be_bytes());
        hasher.update(&[hop.get()]);
        hasher.finalize()
    }
}

impl FingerprintStrategy for Crc32Hash {
    fn fingerprint(&self, identity: &PacketIdentity, hop: HopCount) -> Result<u32, DecisionError> {
        Ok(Self::checksum(identity, hop))
    }

    fn index_base(&self) -> IndexBase {
        IndexBase::Computed
    }

    fn name(&self) -> &'static str {
        "crc32"
    }
}

/// Provisioned fingerprints, one row per packet id (1-based), one column per hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashSchedule {
    rows: Vec<Vec<u32>>,
}

impl HashSchedule {
    /// Build a schedule from a generator
    #[must_use]
    pub fn from_fn<F>(packets: u16, hops: usize, mut f: F) -> Self
    where
        F: FnMut(u16, HopCount) -> u32,
    {
        let hops = hops.min(DEFAULT_MAX_HOPS);
        let rows = (1..=packets)
            .map(|packet_id| {
                (0..hops)
                    .filter_map(|h| u8::try_from(h).ok())
                    .map(|h| f(packet_id, HopCount::new(h)))
                    .collect()
            })
            .collect();
        Self { rows }
    }

    /// Schedule keyed directly by identification number
    #[must_use]
    pub fn reference(packets: u16, hops: usize) -> Self {
        Self::from_fn(packets, hops, |packet_id, hop| {
            hop_hash(u32::from(packet_id), u32::from(hop.get()))
        })
    }

    /// Number of packet rows
    #[must_use]
    pub fn packets(&self) -> usize {
        self.rows.len()
    }

    /// Scheduled fingerprint for `(packet_id, hop)`
    #[must_use]
    pub fn get(&self, packet_id: u16, hop: HopCount) -> Option<u32> {
        let row = usize::from(packet_id).checked_sub(1)?;
        self.rows.get(row)?.get(usize::from(hop.get())).copied()
    }

    /// Parse the CSV form
    ///
    /// # Errors
    ///
    /// Returns `TableError` on I/O failure, non-numeric values, or too many rows.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, TableError> {
        let mut rows = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let row = line
                .split(',')
                .map(str::trim)
                .map(|t| {
                    t.parse::<u32>().map_err(|_| TableError::Parse {
                        line: idx + 1,
                        value: t.to_string(),
                    })
                })
                .collect::<Result<Vec<u32>, _>>()?;
            if row.len() > DEFAULT_MAX_HOPS {
                return Err(TableError::TooManyHops {
                    hops: row.len(),
                    max_hops: DEFAULT_MAX_HOPS,
                });
            }
            rows.push(row);
        }
        if rows.len() > usize::from(u16::MAX) {
            return Err(TableError::Dimensions(format!(
                "{} packet rows exceeds the 16-bit identification space",
                rows.len()
            )));
        }
        Ok(Self { rows })
    }

    /// Load the CSV form from a file
    ///
    /// # Errors
    ///
    /// Returns `TableError` if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let file = std::fs::File::open(path.as_ref())?;
        let schedule = Self::from_reader(std::io::BufReader::new(file))?;
        tracing::info!(
            "Loaded hash schedule {} ({} packets)",
            path.as_ref().display(),
            schedule.packets()
        );
        Ok(schedule)
    }

    /// Write the CSV form
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the writer.
    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for row in &self.rows {
            let line = row
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            writeln!(writer, "{line}")?;
        }
        writer.flush()
    }

    /// Write the CSV form to a file
    ///
    /// # Errors
    ///
    /// Returns any I/O error.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_to(std::io::BufWriter::new(file))
    }
}

/// Strategy backed by a [`HashSchedule`]
#[derive(Debug, Clone)]
pub struct PrecomputedHash {
    schedule: Arc<HashSchedule>,
}

impl PrecomputedHash {
    /// Wrap a schedule
    #[must_use]
    pub fn new(schedule: Arc<HashSchedule>) -> Self {
        Self { schedule }
    }

    /// Underlying schedule
    #[must_use]
    pub fn schedule(&self) -> &HashSchedule {
        &self.schedule
    }
}

impl FingerprintStrategy for PrecomputedHash {
    fn fingerprint(&self, identity: &PacketIdentity, hop: HopCount) -> Result<u32, DecisionError> {
        self.schedule
            .get(identity.id, hop)
            .ok_or(DecisionError::FingerprintMiss {
                packet_id: identity.id,
                hop: hop.get(),
            })
    }

    fn index_base(&self) -> IndexBase {
        IndexBase::Provisioned
    }

    fn name(&self) -> &'static str {
        "precomputed"
    }
}

/// Fingerprint strategy selector used by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashVariant {
    /// [`MixHash`]
    #[default]
    Mix,
    /// [`Crc32Hash`]
    Crc32,
    /// [`PrecomputedHash`]
    Precomputed,
}

impl fmt::Display for HashVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mix => write!(f, "mix"),
            Self::Crc32 => write!(f, "crc32"),
            Self::Precomputed => write!(f, "precomputed"),
        }
    }
}

impl FromStr for HashVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mix" => Ok(Self::Mix),
            "crc32" | "crc" => Ok(Self::Crc32),
            "precomputed" | "fixed" => Ok(Self::Precomputed),
            other => Err(format!("unknown hash variant: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn identity(id: u16) -> PacketIdentity {
        PacketIdentity::v4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), id)
    }

    #[test]
    fn test_mix32_known_values() {
        assert_eq!(mix32(0), 0);
        assert_ne!(mix32(1), 1);
        assert_ne!(mix32(1), mix32(2));
    }

    #[test]
    fn test_mix_hash_deterministic() {
        let strategy = MixHash::with_seed(0xDEAD_BEEF);
        let id = identity(7);
        for hop in 0..=255u8 {
            let hop = HopCount::new(hop);
            assert_eq!(
                strategy.fingerprint(&id, hop).unwrap(),
                strategy.fingerprint(&id, hop).unwrap()
            );
        }
    }

    #[test]
    fn test_mix_hash_depends_on_seed_and_hop() {
        let id = identity(7);
        let a = MixHash::with_seed(1);
        let b = MixHash::with_seed(2);
        assert_ne!(a.packet_key(&id), b.packet_key(&id));
        assert_ne!(
            a.fingerprint(&id, HopCount::new(0)).unwrap(),
            a.fingerprint(&id, HopCount::new(1)).unwrap()
        );
        assert_ne!(a.packet_key(&id), a.packet_key(&identity(8)));
    }

    #[test]
    fn test_crc32_reproducible() {
        let id = identity(7);
        let first = Crc32Hash.fingerprint(&id, HopCount::new(3)).unwrap();
        let second = Crc32Hash::checksum(&id, HopCount::new(3));
        assert_eq!(first, second);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[10, 0, 0, 1, 10, 0, 0, 2, 146, 0, 7, 3]);
        assert_eq!(first, hasher.finalize());
        assert_eq!(Crc32Hash.index_base(), IndexBase::Computed);
    }

    #[test]
    fn test_schedule_lookup_is_one_based() {
        let schedule = HashSchedule::reference(4, 8);
        assert_eq!(schedule.packets(), 4);
        assert_eq!(schedule.get(0, HopCount::ZERO), None);
        assert_eq!(
            schedule.get(1, HopCount::new(2)),
            Some(hop_hash(1, 2))
        );
        assert_eq!(schedule.get(4, HopCount::new(7)), Some(hop_hash(4, 7)));
        assert_eq!(schedule.get(4, HopCount::new(8)), None);
        assert_eq!(schedule.get(5, HopCount::ZERO), None);
    }

    #[test]
    fn test_schedule_csv_roundtrip() {
        let schedule = HashSchedule::reference(3, 5);
        let mut buf = Vec::new();
        schedule.write_to(&mut buf).unwrap();
        let parsed = HashSchedule::from_reader(Cursor::new(buf)).unwrap();
        assert_eq!(parsed, schedule);
    }

    #[test]
    fn test_schedule_parse_error() {
        let err = HashSchedule::from_reader(Cursor::new("1,2\n3,x\n")).unwrap_err();
        assert!(matches!(err, TableError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_precomputed_miss() {
        let strategy = PrecomputedHash::new(Arc::new(HashSchedule::reference(2, 4)));
        assert!(strategy.fingerprint(&identity(1), HopCount::new(3)).is_ok());
        assert_eq!(
            strategy.fingerprint(&identity(9), HopCount::new(3)),
            Err(DecisionError::FingerprintMiss { packet_id: 9, hop: 3 })
        );
    }

    #[test]
    fn test_hash_variant_parse() {
        assert_eq!("mix".parse::<HashVariant>(), Ok(HashVariant::Mix));
        assert_eq!("CRC32".parse::<HashVariant>(), Ok(HashVariant::Crc32));
        assert_eq!("fixed".parse::<HashVariant>(), Ok(HashVariant::Precomputed));
        assert!("murmur".parse::<HashVariant>().is_err());
        assert_eq!(HashVariant::Crc32.to_string(), "crc32");
    }
}
