//! RECIPE-D CLI
//!
//! Hop emulator, packet lifecycle driver and degree-distribution simulator

mod config;
mod output;
mod progress;

use clap::{Args, Parser, Subcommand};
use recipe_core::{
    Crc32Hash, DegreeHistogram, FingerprintStrategy, HashSchedule, HashVariant, HopDecisionEngine,
    HopProcessor, HopServer, LifecycleDriver, MixHash, PacketIdentity, PrecomputedHash,
    ProbabilityTable, RestartPolicy, SimulationConfig,
};
use recipe_transport::{AsyncUdpTransport, MemoryTransport, Transport};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use config::Config;
use output::{TraceFormat, TraceWriter};
use progress::{RunProgress, format_duration, format_rate};

/// Synthetic driver address of the in-process link used by `run --local`
const LOCAL_DRIVER_ADDR: SocketAddr =
    SocketAddr::V4(std::net::SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9001));

/// RECIPE - per-hop LT-style encoding of hop identifiers
#[derive(Parser)]
#[command(name = "recipe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Decision engine overrides shared by several commands
#[derive(Args, Debug, Clone)]
struct EngineArgs {
    /// Probability table file
    #[arg(long)]
    table: Option<PathBuf>,

    /// Fingerprint strategy (mix, crc32, precomputed)
    #[arg(long)]
    hash: Option<HashVariant>,

    /// Seed for the mixing strategy
    #[arg(long)]
    seed: Option<u32>,

    /// Hash schedule for the precomputed strategy
    #[arg(long)]
    schedule: Option<PathBuf>,

    /// Restart branch behavior (two_threshold, above_threshold, unconditional)
    #[arg(long)]
    policy: Option<RestartPolicy>,
}

/// Flow the generated packets belong to
#[derive(Args, Debug, Clone)]
struct FlowArgs {
    /// Source address
    #[arg(long, default_value = "10.0.0.1")]
    src: Ipv4Addr,

    /// Destination address
    #[arg(long, default_value = "10.0.0.2")]
    dst: Ipv4Addr,
}

impl FlowArgs {
    fn identity(&self, id: u16) -> PacketIdentity {
        PacketIdentity::v4(self.src, self.dst, id)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve hop decisions over UDP
    Hop {
        /// Listen address
        #[arg(short, long)]
        listen: Option<String>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Drive packets through a hop until they terminate
    Run {
        /// Packets to drive
        #[arg(short = 'n', long, default_value_t = 100)]
        count: u16,

        /// Identification of the first packet
        #[arg(long, default_value_t = 1)]
        first_id: u16,

        /// Hop address (overrides the config)
        #[arg(long)]
        hop: Option<String>,

        /// Run an in-process hop instead of sending over UDP
        #[arg(long)]
        local: bool,

        /// Re-compute every hop locally and count disagreements
        #[arg(long)]
        verify: bool,

        /// Hop count at which packets terminate
        #[arg(long)]
        max_iterations: Option<u8>,

        /// Trace output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Trace file format (csv, json)
        #[arg(long)]
        format: Option<TraceFormat>,

        #[command(flatten)]
        flow: FlowArgs,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Histogram final degrees without any transport
    Simulate {
        /// Packets to simulate
        #[arg(short = 'n', long, default_value_t = 2000)]
        packets: u16,

        /// Path length
        #[arg(long, default_value_t = 64)]
        hops: u8,

        /// Print the histogram as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        flow: FlowArgs,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Write the reference fingerprint schedule
    Hashes {
        /// Output file
        #[arg(short, long, default_value = "hashes.csv")]
        output: PathBuf,

        /// Packet rows
        #[arg(long, default_value_t = 2000)]
        packets: u16,

        /// Hop columns
        #[arg(long, default_value_t = 256)]
        hops: u16,
    },

    /// Show configuration and table status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Hop { listen, engine } => {
            run_hop(listen, &engine, &config).await?;
        }
        Commands::Run {
            count,
            first_id,
            hop,
            local,
            verify,
            max_iterations,
            output,
            format,
            flow,
            engine,
        } => {
            let options = RunOptions {
                count,
                first_id,
                hop,
                local,
                verify,
                max_iterations,
                output,
                format,
            };
            run_packets(options, &flow, &engine, &config).await?;
        }
        Commands::Simulate {
            packets,
            hops,
            json,
            flow,
            engine,
        } => {
            run_simulation(packets, hops, json, &flow, &engine, &config)?;
        }
        Commands::Hashes {
            output,
            packets,
            hops,
        } => {
            write_hashes(&output, packets, hops)?;
        }
        Commands::Status => {
            show_status(&config)?;
        }
    }

    Ok(())
}

/// Load the probability table named on the command line or in the config
fn load_table(args: &EngineArgs, config: &Config) -> anyhow::Result<ProbabilityTable> {
    let Some(path) = args.table.as_ref().or(config.table.path.as_ref()) else {
        anyhow::bail!("No probability table configured (set [table] path or pass --table)");
    };
    Ok(ProbabilityTable::load(
        path,
        config.table.max_hops,
        config.table.max_degree,
    )?)
}

/// Build the configured fingerprint strategy
fn build_strategy(
    args: &EngineArgs,
    config: &Config,
) -> anyhow::Result<Arc<dyn FingerprintStrategy>> {
    let variant = args.hash.unwrap_or(config.hash.variant);
    let strategy: Arc<dyn FingerprintStrategy> = match variant {
        HashVariant::Mix => match args.seed.or(config.hash.seed) {
            Some(seed) => Arc::new(MixHash::with_seed(seed)),
            None => {
                let strategy = MixHash::random();
                tracing::info!("Using random mixing seed {:#010x}", strategy.seed());
                Arc::new(strategy)
            }
        },
        HashVariant::Crc32 => Arc::new(Crc32Hash),
        HashVariant::Precomputed => {
            let Some(path) = args.schedule.as_ref().or(config.hash.schedule.as_ref()) else {
                anyhow::bail!("Precomputed hash variant needs a schedule file (--schedule)");
            };
            Arc::new(PrecomputedHash::new(Arc::new(HashSchedule::load(path)?)))
        }
    };
    Ok(strategy)
}

fn build_engine(args: &EngineArgs, config: &Config) -> anyhow::Result<HopDecisionEngine> {
    let table = Arc::new(load_table(args, config)?);
    let strategy = build_strategy(args, config)?;
    let policy = args.policy.unwrap_or(config.hop.restart_policy);
    Ok(HopDecisionEngine::new(table, strategy, policy))
}

/// Serve hop decisions until Ctrl+C
async fn run_hop(
    listen: Option<String>,
    args: &EngineArgs,
    config: &Config,
) -> anyhow::Result<()> {
    let mut hop_config = config.hop_config()?;
    if let Some(listen) = listen {
        hop_config.listen_addr = listen.parse()?;
    }
    if let Some(policy) = args.policy {
        hop_config.restart_policy = policy;
    }

    let engine = build_engine(args, config)?;
    let transport = AsyncUdpTransport::bind(hop_config.listen_addr).await?;
    let local_addr = transport.local_addr()?;

    println!("RECIPE Hop");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Listen: {}", local_addr);
    println!("Fingerprint: {}", engine.strategy().name());
    println!("Restart policy: {}", engine.policy());
    println!("Press Ctrl+C to stop");

    let server = HopServer::new(Arc::new(transport), HopProcessor::new(engine), &hop_config);
    let handle = server.start()?;

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    server.stop()?;
    handle.await?;

    let stats = server.stats();
    println!(
        "Processed: {}  Expired: {}  Malformed: {}  Rejected: {}",
        stats.processed, stats.expired, stats.malformed, stats.rejected
    );

    Ok(())
}

/// Options of the `run` command
struct RunOptions {
    count: u16,
    first_id: u16,
    hop: Option<String>,
    local: bool,
    verify: bool,
    max_iterations: Option<u8>,
    output: Option<PathBuf>,
    format: Option<TraceFormat>,
}

/// Drive packets to termination and write their traces
async fn run_packets(
    options: RunOptions,
    flow: &FlowArgs,
    args: &EngineArgs,
    config: &Config,
) -> anyhow::Result<()> {
    let mut driver_config = config.driver_config()?;
    if let Some(hop) = &options.hop {
        driver_config.hop_addr = hop.parse()?;
    }
    if let Some(max_iterations) = options.max_iterations {
        driver_config.max_iterations = max_iterations;
    }

    // The engine is only needed when something computes decisions locally
    let engine = if options.local || options.verify {
        Some(build_engine(args, config)?)
    } else {
        None
    };

    let mut local_hop = None;
    let transport: Arc<dyn Transport> = if options.local {
        let (near, far) = MemoryTransport::pair(LOCAL_DRIVER_ADDR, driver_config.hop_addr);
        let far: Arc<dyn Transport> = far;
        if let Some(engine) = engine.clone() {
            let server = HopServer::new(far, HopProcessor::new(engine), &config.hop_config()?);
            let handle = server.start()?;
            local_hop = Some((server, handle));
        }
        let near: Arc<dyn Transport> = near;
        near
    } else {
        let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        Arc::new(AsyncUdpTransport::bind(bind).await?)
    };

    let target = if options.local {
        "in-process hop".to_string()
    } else {
        driver_config.hop_addr.to_string()
    };
    let driver = match engine.filter(|_| options.verify) {
        Some(engine) => LifecycleDriver::with_verifier(driver_config, transport, engine)?,
        None => LifecycleDriver::new(driver_config, transport)?,
    };

    let format = options.format.unwrap_or(config.output.format);
    let writer = TraceWriter::create(
        options.output.as_ref().unwrap_or(&config.output.dir),
        format,
    )?;

    println!("Target: {}", target);
    println!("Packets: {} (ids from {})", options.count, options.first_id);
    println!("Max iterations: {}", driver.config().max_iterations);
    println!("Output: {} ({})", writer.dir().display(), format);

    driver.start()?;
    let started = Instant::now();
    let progress = RunProgress::new(u64::from(options.count), &target);

    let mut tasks = JoinSet::new();
    for offset in 0..options.count {
        let identity = flow.identity(options.first_id.wrapping_add(offset));
        let driver = driver.clone();
        tasks.spawn(async move { (identity, driver.drive(identity).await) });
    }

    let mut histogram = DegreeHistogram::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            joined = tasks.join_next() => {
                let Some(joined) = joined else { break };
                let (identity, result) = joined?;
                progress.inc();
                match result {
                    Ok(trace) => {
                        histogram.record(trace.final_degree());
                        writer.write(&trace)?;
                    }
                    Err(e) => {
                        histogram.record_failure();
                        progress.println(format!("Packet {identity} failed: {e}"));
                    }
                }
            }
            _ = &mut ctrl_c, if driver.is_running() => {
                progress.println("Interrupted, cancelling packets in flight");
                driver.stop()?;
            }
        }
    }

    if driver.is_running() {
        driver.stop()?;
    }
    if let Some((server, handle)) = local_hop {
        server.stop()?;
        handle.await?;
    }

    let elapsed = started.elapsed();
    progress.finish_with_message(format!(
        "Done in {} ({})",
        format_duration(elapsed),
        format_rate(histogram.total() + histogram.failed(), elapsed)
    ));

    let stats = driver.stats();
    writer.write_summary(&stats, &histogram)?;

    println!();
    println!("Driver:");
    println!(
        "  Sent: {}  Received: {}  Retried: {}",
        stats.sent, stats.received, stats.retried
    );
    println!(
        "  Discarded: {} malformed, {} unknown identity, {} stale",
        stats.malformed, stats.unknown_identity, stats.stale
    );
    println!("  Terminated: {}  Failed: {}", stats.terminated, stats.failed);
    if options.verify {
        println!("  Verification mismatches: {}", stats.mismatched);
    }
    println!();
    println!("Final degree distribution:");
    print!("{histogram}");

    Ok(())
}

/// Run the in-process degree simulation
fn run_simulation(
    packets: u16,
    hops: u8,
    json: bool,
    flow: &FlowArgs,
    args: &EngineArgs,
    config: &Config,
) -> anyhow::Result<()> {
    let engine = build_engine(args, config)?;
    let started = Instant::now();
    let histogram = recipe_core::simulate(
        &engine,
        &SimulationConfig {
            flow: flow.identity(0),
            packets,
            hops,
        },
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&histogram)?);
    } else {
        println!(
            "Simulated {} packets over {} hops in {}",
            packets,
            hops,
            format_duration(started.elapsed())
        );
        print!("{histogram}");
    }

    Ok(())
}

/// Write the reference fingerprint schedule
fn write_hashes(output: &Path, packets: u16, hops: u16) -> anyhow::Result<()> {
    if packets == 0 || hops == 0 || hops > 256 {
        anyhow::bail!("Schedule needs 1..=65535 packets and 1..=256 hops");
    }
    let schedule = HashSchedule::reference(packets, usize::from(hops));
    schedule.save(output)?;
    println!(
        "Wrote {} x {} fingerprints to {}",
        packets,
        hops,
        output.display()
    );
    Ok(())
}

/// Show configuration and table status
fn show_status(config: &Config) -> anyhow::Result<()> {
    println!("RECIPE Status");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("Table:");
    match &config.table.path {
        Some(path) => {
            println!("  Path: {}", path.display());
            match ProbabilityTable::load(path, config.table.max_hops, config.table.max_degree) {
                Ok(table) => {
                    println!(
                        "  Dimensions: {} hops x {} degrees",
                        table.max_hops(),
                        table.max_degree()
                    );
                    println!("  Provisioned cells: {}", table.provisioned_cells());
                }
                Err(e) => println!("  Not loadable: {e}"),
            }
        }
        None => println!("  Path: (not configured)"),
    }
    println!();

    println!("Fingerprint:");
    println!("  Variant: {}", config.hash.variant);
    if let Some(seed) = config.hash.seed {
        println!("  Seed: {seed:#010x}");
    }
    if let Some(schedule) = &config.hash.schedule {
        println!("  Schedule: {}", schedule.display());
    }
    println!();

    println!("Driver:");
    println!("  Hop: {}", config.driver.hop_addr);
    println!("  Max iterations: {}", config.driver.max_iterations);
    println!(
        "  Timeout: {}ms x {} retries",
        config.driver.timeout_ms, config.driver.retries
    );
    println!("  Max in flight: {}", config.driver.max_in_flight);
    println!();

    println!("Hop:");
    println!("  Listen: {}", config.hop.listen_addr);
    println!("  Restart policy: {}", config.hop.restart_policy);
    println!();

    println!("Output:");
    println!("  Directory: {}", config.output.dir.display());
    println!("  Format: {}", config.output.format);

    Ok(())
}
