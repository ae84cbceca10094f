//! Per-packet trace files and run summaries.

use recipe_core::{DegreeHistogram, DriverStats, PacketTrace};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// CSV column header of a per-packet trace
pub const CSV_HEADER: &str = "hopid,ttl,pint,xor_degree";

/// Trace file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceFormat {
    /// One `hopid,ttl,pint,xor_degree` row per observation
    #[default]
    Csv,
    /// The whole trace as a JSON document
    Json,
}

impl TraceFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TraceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown trace format: {other}")),
        }
    }
}

/// Write one trace as CSV
///
/// # Errors
///
/// Returns any I/O error from the writer.
pub fn write_csv<W: Write>(trace: &PacketTrace, mut writer: W) -> std::io::Result<()> {
    writeln!(writer, "{CSV_HEADER}")?;
    for record in &trace.records {
        writeln!(
            writer,
            "{},{},{},{}",
            record.hop_id, record.ttl, record.symbol, record.degree
        )?;
    }
    writer.flush()
}

/// Writes traces into a directory, one file per packet
#[derive(Debug, Clone)]
pub struct TraceWriter {
    dir: PathBuf,
    format: TraceFormat,
}

impl TraceWriter {
    /// Create the output directory if needed
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create<P: AsRef<Path>>(dir: P, format: TraceFormat) -> anyhow::Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            format,
        })
    }

    /// Output directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a packet's trace is written to
    #[must_use]
    pub fn path_for(&self, trace: &PacketTrace) -> PathBuf {
        self.dir.join(format!(
            "packet_{}.{}",
            trace.identity.id,
            self.format.extension()
        ))
    }

    /// Write one packet's trace
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, trace: &PacketTrace) -> anyhow::Result<PathBuf> {
        let path = self.path_for(trace);
        let writer = BufWriter::new(File::create(&path)?);
        match self.format {
            TraceFormat::Csv => write_csv(trace, writer)?,
            TraceFormat::Json => serde_json::to_writer_pretty(writer, trace)?,
        }
        Ok(path)
    }

    /// Write the run summary next to the traces
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_summary(
        &self,
        stats: &DriverStats,
        histogram: &DegreeHistogram,
    ) -> anyhow::Result<PathBuf> {
        #[derive(Serialize)]
        struct Summary<'a> {
            stats: &'a DriverStats,
            histogram: &'a DegreeHistogram,
        }

        let path = self.dir.join("summary.json");
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, &Summary { stats, histogram })?;
        Ok(path)
    }
}
