//! natprobe CLI
//!
//! Classifies the NAT in front of this host using RFC 3489 STUN probes.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use console::style;
use natprobe_discovery::{Classification, NatDetector, NatType};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{ProbeProgress, format_duration};

/// natprobe - discover your NAT type
#[derive(Parser)]
#[command(name = "natprobe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one NAT type classification
    Detect {
        /// STUN server (host:port)
        #[arg(short, long)]
        server: Option<String>,

        /// Local bind address
        #[arg(short, long)]
        bind: Option<String>,

        /// Overall deadline in seconds
        #[arg(short, long)]
        deadline: Option<u64>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;

    if let Commands::Detect {
        server,
        bind,
        deadline,
    } = &cli.command
    {
        if let Some(server) = server {
            config.stun.server.clone_from(server);
        }
        if let Some(bind) = bind {
            config.stun.bind_addr.clone_from(bind);
        }
        if let Some(deadline) = deadline {
            config.detect.deadline_secs = *deadline;
        }
    }

    config.validate()?;

    // Logs go to stderr so stdout stays clean for --json
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Detect { .. } => detect(&config, cli.json).await,
        Commands::Config => {
            show_config(&config, cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run one classification and report it
async fn detect(config: &Config, json: bool) -> anyhow::Result<ExitCode> {
    let detector = NatDetector::with_config(config.detector_config()?);
    let deadline = config.deadline();

    tracing::info!(
        "Detecting NAT type via {} (deadline {}s)",
        config.stun.server,
        config.detect.deadline_secs
    );

    let progress = if json {
        ProbeProgress::hidden()
    } else {
        ProbeProgress::new(&config.stun.server)
    };

    let started = Instant::now();
    let Ok(classification) = tokio::time::timeout(deadline, detector.discover()).await else {
        let msg = format!("Deadline of {}s expired", deadline.as_secs());
        progress.abandon_with_message(msg.clone());
        if json {
            let value = serde_json::json!({
                "server": config.stun.server,
                "nat_type": NatType::Error,
                "hosts": [],
                "error": msg,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            eprintln!("{} {}", style("error:").red().bold(), msg);
        }
        return Ok(ExitCode::FAILURE);
    };
    let elapsed = started.elapsed();
    progress.finish();

    if json {
        print_json(config, &classification)?;
    } else {
        print_report(config, &classification, elapsed);
    }

    if classification.is_ok() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_json(config: &Config, classification: &Classification) -> anyhow::Result<()> {
    let value = serde_json::json!({
        "server": config.stun.server,
        "nat_type": classification.nat_type,
        "description": classification.nat_type.to_string(),
        "hosts": classification.hosts,
        "error": classification.error.as_ref().map(ToString::to_string),
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_report(config: &Config, classification: &Classification, elapsed: std::time::Duration) {
    let nat_type = classification.nat_type;
    let label = match nat_type {
        NatType::None | NatType::Full => style(nat_type.to_string()).green().bold(),
        NatType::Restricted | NatType::PortRestricted => {
            style(nat_type.to_string()).yellow().bold()
        }
        NatType::Error | NatType::Unknown | NatType::Blocked => {
            style(nat_type.to_string()).red().bold()
        }
        NatType::Symmetric | NatType::SymmetricUdpFirewall => {
            style(nat_type.to_string()).magenta().bold()
        }
    };

    println!("STUN server: {}", config.stun.server);
    println!("NAT type:    {label}");

    match classification.external_addr() {
        Some(addr) => println!("External:    {addr}"),
        None => println!("External:    {}", style("unknown").dim()),
    }
    for host in classification.hosts.iter().skip(1) {
        println!("             {host}");
    }

    println!("Elapsed:     {}", format_duration(elapsed));

    if let Some(e) = &classification.error {
        eprintln!("{} {}", style("error:").red().bold(), e);
    }
}

/// Print effective configuration
fn show_config(config: &Config, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }
    println!("# {}", Config::default_path().display());
    print!("{}", config.to_toml()?);
    Ok(())
}
