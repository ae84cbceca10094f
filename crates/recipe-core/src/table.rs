//! Degree- and hop-indexed probability table.
//!
//! Each cell holds two fixed-point thresholds over the 32-bit fingerprint
//! space: `extend` (cumulative mass for folding the current hop into the
//! symbol) and `restart` (mass for starting a new symbol at this hop).
//!
//! Cells are stored flat at `hop * max_degree + degree`. The table is built
//! once through [`TableBuilder`] and is immutable afterwards, so it can be
//! shared across packet tasks behind an `Arc` without locking.
//!
//! # Text format
//!
//! One line per hop, starting at hop 0. Each line is a comma separated list
//! of probability pairs, one pair per degree:
//!
//! ```text
//! a_0, r_0, a_1, r_1, a_2, r_2, ...
//! ```
//!
//! Probabilities are scaled by `2^32` into `u32` thresholds.

use crate::error::TableError;
use crate::hop_count::HopCount;
use std::io::BufRead;
use std::path::Path;

/// Degree bound of the hardware register layout
pub const DEFAULT_MAX_DEGREE: usize = 256;

/// Hop bound: every hop count an 8-bit TTL can produce
pub const DEFAULT_MAX_HOPS: usize = 256;

/// Largest acceptable fixed-point approximation error before warning
const APPROXIMATION_TOLERANCE: f64 = 1e-4;

const FIXED_POINT_SCALE: f64 = 4_294_967_296.0; // 2^32

/// Thresholds of one `(hop, degree)` cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Thresholds {
    /// Threshold `a`: extend when the fingerprint falls below it
    pub extend: u32,
    /// Threshold `r`: restart when the fingerprint falls below it
    pub restart: u32,
}

impl Thresholds {
    /// Create thresholds from raw fixed-point values
    #[must_use]
    pub const fn new(extend: u32, restart: u32) -> Self {
        Self { extend, restart }
    }

    /// Create thresholds from probabilities in `[0, 1]`
    #[must_use]
    pub fn from_probabilities(extend: f64, restart: f64) -> Self {
        Self {
            extend: probability_to_fixed(extend),
            restart: probability_to_fixed(restart),
        }
    }
}

/// How the flat row offset of a hop is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBase {
    /// Read the per-hop base from the provisioned index table
    Provisioned,
    /// Compute `hop * max_degree` directly
    Computed,
}

/// Convert a probability to a 32-bit fixed-point threshold.
///
/// Values at or above `1.0` saturate to `u32::MAX`; negative values and NaN
/// map to zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn probability_to_fixed(p: f64) -> u32 {
    let scaled = p * FIXED_POINT_SCALE;
    if scaled.is_nan() || scaled <= 0.0 {
        0
    } else if scaled >= u32::MAX as f64 {
        u32::MAX
    } else {
        scaled as u32
    }
}

/// Convert a fixed-point threshold back to a probability
#[must_use]
pub fn fixed_to_probability(v: u32) -> f64 {
    f64::from(v) / FIXED_POINT_SCALE
}

/// Immutable probability table
#[derive(Debug, Clone)]
pub struct ProbabilityTable {
    max_hops: usize,
    max_degree: usize,
    cells: Vec<Option<Thresholds>>,
    base_index: Vec<usize>,
}

impl ProbabilityTable {
    /// Start building a table of the given dimensions
    ///
    /// # Errors
    ///
    /// Returns `TableError::Dimensions` if either bound is zero or the degree
    /// bound does not fit the 8-bit degree field.
    pub fn builder(max_hops: usize, max_degree: usize) -> Result<TableBuilder, TableError> {
        TableBuilder::new(max_hops, max_degree)
    }

    /// A table with the same thresholds in every cell
    ///
    /// # Errors
    ///
    /// Returns `TableError::Dimensions` for unusable bounds.
    pub fn uniform(
        max_hops: usize,
        max_degree: usize,
        thresholds: Thresholds,
    ) -> Result<Self, TableError> {
        let mut builder = TableBuilder::new(max_hops, max_degree)?;
        builder.cells.fill(Some(thresholds));
        Ok(builder.build())
    }

    /// Parse a table from its text form
    ///
    /// # Errors
    ///
    /// Returns a `TableError` on malformed input or when the input exceeds
    /// the given bounds.
    pub fn from_reader<R: BufRead>(
        reader: R,
        max_hops: usize,
        max_degree: usize,
    ) -> Result<Self, TableError> {
        let mut builder = TableBuilder::new(max_hops, max_degree)?;
        let mut hop = 0usize;

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if hop >= max_hops {
                return Err(TableError::TooManyHops {
                    hops: hop + 1,
                    max_hops,
                });
            }

            let values = line
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| {
                    t.parse::<f64>().map_err(|_| TableError::Parse {
                        line: line_no,
                        value: t.to_string(),
                    })
                })
                .collect::<Result<Vec<f64>, _>>()?;

            if values.len() % 2 != 0 {
                return Err(TableError::OddColumns {
                    line: line_no,
                    columns: values.len(),
                });
            }
            let degrees = values.len() / 2;
            if degrees > max_degree {
                return Err(TableError::TooManyDegrees {
                    line: line_no,
                    degrees,
                    max_degree,
                });
            }

            for (degree, pair) in values.chunks_exact(2).enumerate() {
                for &p in pair {
                    if !(0.0..=1.0).contains(&p) {
                        return Err(TableError::OutOfRange {
                            line: line_no,
                            value: p,
                        });
                    }
                }
                let thresholds = Thresholds::from_probabilities(pair[0], pair[1]);
                warn_on_approximation(hop, degree, pair[0], thresholds.extend);
                warn_on_approximation(hop, degree, pair[1], thresholds.restart);
                builder.cells[hop * max_degree + degree] = Some(thresholds);
            }
            hop += 1;
        }

        let table = builder.build();
        tracing::info!(
            "Loaded probability table: {} hops x {} degrees, {} cells provisioned",
            hop,
            max_degree,
            table.provisioned_cells()
        );
        Ok(table)
    }

    /// Load a table from a text file
    ///
    /// # Errors
    ///
    /// Returns a `TableError` if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(
        path: P,
        max_hops: usize,
        max_degree: usize,
    ) -> Result<Self, TableError> {
        let file = std::fs::File::open(path.as_ref())?;
        tracing::debug!("Parsing probability table {}", path.as_ref().display());
        Self::from_reader(std::io::BufReader::new(file), max_hops, max_degree)
    }

    /// Hop bound
    #[must_use]
    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    /// Degree bound (row stride)
    #[must_use]
    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Number of cells holding thresholds
    #[must_use]
    pub fn provisioned_cells(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Provisioned row offset of `hop`
    #[must_use]
    pub fn base_index(&self, hop: HopCount) -> Option<usize> {
        self.base_index.get(usize::from(hop.get())).copied()
    }

    /// Computed row offset of `hop`, `None` past the hop bound
    #[must_use]
    pub fn computed_base(&self, hop: HopCount) -> Option<usize> {
        let hop = usize::from(hop.get());
        (hop < self.max_hops).then(|| hop * self.max_degree)
    }

    /// Look up `(hop, degree)` with the computed row offset
    #[must_use]
    pub fn get(&self, hop: HopCount, degree: u8) -> Option<Thresholds> {
        self.lookup(IndexBase::Computed, hop, degree)
    }

    /// Look up `(hop, degree)` with the given row offset mode.
    ///
    /// Degrees at or beyond `max_degree` miss rather than spilling into the
    /// next hop's row.
    #[must_use]
    pub fn lookup(&self, mode: IndexBase, hop: HopCount, degree: u8) -> Option<Thresholds> {
        let degree = usize::from(degree);
        if degree >= self.max_degree {
            return None;
        }
        let base = match mode {
            IndexBase::Provisioned => self.base_index(hop)?,
            IndexBase::Computed => self.computed_base(hop)?,
        };
        self.cells.get(base + degree).copied().flatten()
    }
}

fn warn_on_approximation(hop: usize, degree: usize, p: f64, fixed: u32) {
    if (fixed_to_probability(fixed) - p).abs() > APPROXIMATION_TOLERANCE {
        tracing::warn!(
            "Fixed-point approximation error too high for hop {} degree {}",
            hop,
            degree
        );
    }
}

/// Write-once builder for [`ProbabilityTable`]
#[derive(Debug)]
pub struct TableBuilder {
    max_hops: usize,
    max_degree: usize,
    cells: Vec<Option<Thresholds>>,
}

impl TableBuilder {
    fn new(max_hops: usize, max_degree: usize) -> Result<Self, TableError> {
        if max_hops == 0 || max_hops > DEFAULT_MAX_HOPS {
            return Err(TableError::Dimensions(format!(
                "max_hops must be in 1..={DEFAULT_MAX_HOPS}, got {max_hops}"
            )));
        }
        if max_degree == 0 || max_degree > DEFAULT_MAX_DEGREE {
            return Err(TableError::Dimensions(format!(
                "max_degree must be in 1..={DEFAULT_MAX_DEGREE}, got {max_degree}"
            )));
        }
        Ok(Self {
            max_hops,
            max_degree,
            cells: vec![None; max_hops * max_degree],
        })
    }

    /// Provision one cell
    ///
    /// # Errors
    ///
    /// Returns `TableError::Dimensions` if the cell lies outside the table.
    pub fn set(
        &mut self,
        hop: u8,
        degree: u8,
        thresholds: Thresholds,
    ) -> Result<&mut Self, TableError> {
        let (hop, degree) = (usize::from(hop), usize::from(degree));
        if hop >= self.max_hops || degree >= self.max_degree {
            return Err(TableError::Dimensions(format!(
                "cell ({hop}, {degree}) outside {}x{}",
                self.max_hops, self.max_degree
            )));
        }
        self.cells[hop * self.max_degree + degree] = Some(thresholds);
        Ok(self)
    }

    /// Freeze the table and provision the per-hop base index
    #[must_use]
    pub fn build(self) -> ProbabilityTable {
        let base_index = (0..self.max_hops).map(|h| h * self.max_degree).collect();
        ProbabilityTable {
            max_hops: self.max_hops,
            max_degree: self.max_degree,
            cells: self.cells,
            base_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_fixed_point_conversion() {
        assert_eq!(probability_to_fixed(0.0), 0);
        assert_eq!(probability_to_fixed(0.25), 0x4000_0000);
        assert_eq!(probability_to_fixed(0.5), 0x8000_0000);
        assert_eq!(probability_to_fixed(1.0), u32::MAX);
        assert_eq!(probability_to_fixed(-0.1), 0);
        assert_eq!(probability_to_fixed(f64::NAN), 0);
        assert!((fixed_to_probability(0x4000_0000) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_builder_and_lookup() {
        let mut builder = ProbabilityTable::builder(4, 8).unwrap();
        builder
            .set(0, 0, Thresholds::new(0x4000_0000, 0x8000_0000))
            .unwrap()
            .set(1, 1, Thresholds::new(0x2000_0000, 0x6000_0000))
            .unwrap();
        let table = builder.build();

        assert_eq!(
            table.get(HopCount::new(0), 0),
            Some(Thresholds::new(0x4000_0000, 0x8000_0000))
        );
        assert_eq!(
            table.get(HopCount::new(1), 1),
            Some(Thresholds::new(0x2000_0000, 0x6000_0000))
        );
        assert_eq!(table.get(HopCount::new(1), 0), None);
        assert_eq!(table.provisioned_cells(), 2);
    }

    #[test]
    fn test_out_of_range_lookups_miss() {
        let table = ProbabilityTable::uniform(4, 8, Thresholds::new(1, 2)).unwrap();
        assert!(table.get(HopCount::new(3), 7).is_some());
        // Degree past the stride must not read the next hop's row
        assert!(table.get(HopCount::new(0), 8).is_none());
        assert!(table.get(HopCount::new(4), 0).is_none());
        assert!(
            table
                .lookup(IndexBase::Provisioned, HopCount::new(4), 0)
                .is_none()
        );
    }

    #[test]
    fn test_provisioned_matches_computed() {
        let table = ProbabilityTable::uniform(16, 32, Thresholds::new(7, 9)).unwrap();
        for hop in 0..16u8 {
            let hop = HopCount::new(hop);
            assert_eq!(table.base_index(hop), table.computed_base(hop));
            assert_eq!(
                table.lookup(IndexBase::Provisioned, hop, 5),
                table.lookup(IndexBase::Computed, hop, 5)
            );
        }
    }

    #[test]
    fn test_set_outside_table() {
        let mut builder = ProbabilityTable::builder(2, 2).unwrap();
        assert!(builder.set(2, 0, Thresholds::new(0, 0)).is_err());
        assert!(builder.set(0, 2, Thresholds::new(0, 0)).is_err());
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(ProbabilityTable::builder(0, 8).is_err());
        assert!(ProbabilityTable::builder(8, 0).is_err());
        assert!(ProbabilityTable::builder(257, 8).is_err());
        assert!(ProbabilityTable::builder(8, 257).is_err());
    }

    #[test]
    fn test_from_reader() {
        let text = "0.25, 0.5, 0.125, 0.75\n\n0.5,1.0\n";
        let table = ProbabilityTable::from_reader(Cursor::new(text), 8, 4).unwrap();

        assert_eq!(
            table.get(HopCount::new(0), 0),
            Some(Thresholds::new(0x4000_0000, 0x8000_0000))
        );
        assert_eq!(
            table.get(HopCount::new(0), 1),
            Some(Thresholds::new(0x2000_0000, 0xC000_0000))
        );
        assert_eq!(
            table.get(HopCount::new(1), 0),
            Some(Thresholds::new(0x8000_0000, u32::MAX))
        );
        assert_eq!(table.get(HopCount::new(1), 1), None);
        assert_eq!(table.get(HopCount::new(2), 0), None);
    }

    #[test]
    fn test_from_reader_errors() {
        let odd = ProbabilityTable::from_reader(Cursor::new("0.1,0.2,0.3"), 4, 4);
        assert!(matches!(odd, Err(TableError::OddColumns { line: 1, columns: 3 })));

        let bad = ProbabilityTable::from_reader(Cursor::new("0.1,zero"), 4, 4);
        assert!(matches!(bad, Err(TableError::Parse { line: 1, .. })));

        let wide = ProbabilityTable::from_reader(Cursor::new("0,0,0,0,0,0"), 4, 2);
        assert!(matches!(wide, Err(TableError::TooManyDegrees { degrees: 3, .. })));

        let tall = ProbabilityTable::from_reader(Cursor::new("0,0\n0,0\n0,0"), 2, 2);
        assert!(matches!(tall, Err(TableError::TooManyHops { .. })));

        let range = ProbabilityTable::from_reader(Cursor::new("1.5,0"), 2, 2);
        assert!(matches!(range, Err(TableError::OutOfRange { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robust8.txt");
        std::fs::write(&path, "0.5,0.75\n0.25,0.5\n").unwrap();

        let table = ProbabilityTable::load(&path, 8, 8).unwrap();
        assert_eq!(table.provisioned_cells(), 2);
        assert!(ProbabilityTable::load(dir.path().join("missing.txt"), 8, 8).is_err());
    }
}
