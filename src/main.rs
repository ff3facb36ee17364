use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use pts_forecourt::config::{
    AuthorizationPolicy, PollerConfig, PtsConfig, PushConfig, ReconcileConfig,
};
use pts_forecourt::persistence::{JsonlTransactionStore, DEFAULT_TRANSACTIONS_PATH};
use pts_forecourt::polling::{CycleReport, Poller};
use pts_forecourt::pts::PtsClient;
use pts_forecourt::push::PushIngestor;
use pts_forecourt::runtime::{build_hub, Forecourt, StationHub};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    /// Poll until Ctrl-C, printing events as JSON lines.
    Poll,
    /// One poll cycle, then the cached state as JSON lines.
    Once,
    /// Print the controller configuration identifier.
    Identify,
    /// Ingest one pushed envelope from stdin and print the acknowledgement.
    Ingest,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Policy {
    Reject,
    Supersede,
}

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[arg(long, env = "PTS_URL", default_value = "https://192.168.1.117/jsonPTS")]
    url: String,

    #[arg(long, env = "PTS_USERNAME", default_value = "admin")]
    username: String,

    #[arg(long, env = "PTS_PASSWORD", default_value = "admin", hide_env_values = true)]
    password: String,

    #[arg(long, value_enum, default_value_t = Mode::Poll)]
    mode: Mode,

    #[arg(long, env = "PTS_TIMEOUT_MS", default_value_t = 30_000)]
    timeout_ms: u64,

    /// Override certificate checking (default: relaxed for https only).
    #[arg(long, env = "PTS_ACCEPT_INVALID_CERTS")]
    accept_invalid_certs: Option<bool>,

    #[arg(long, env = "PTS_POLL_INTERVAL_MS", default_value_t = 1_000)]
    interval_ms: u64,

    #[arg(long, env = "PTS_TANK_INTERVAL_MS", default_value_t = 5_000)]
    tank_interval_ms: u64,

    #[arg(long, env = "PTS_PUMPS", value_delimiter = ',')]
    pumps: Vec<u32>,

    #[arg(long, env = "PTS_PROBES", value_delimiter = ',')]
    probes: Vec<u32>,

    #[arg(long, env = "PTS_TRANSACTIONS_FILE", default_value = DEFAULT_TRANSACTIONS_PATH)]
    transactions_file: String,

    #[arg(long, value_enum, default_value_t = Policy::Reject)]
    on_second_authorization: Policy,

    #[arg(long, env = "PTS_PUSH_SECRET", hide_env_values = true)]
    push_secret: Option<String>,

    /// Hex HMAC-SHA256 of the pushed body (ingest mode).
    #[arg(long)]
    signature: Option<String>,
}

impl Args {
    fn pts_config(&self) -> Result<PtsConfig> {
        let mut config = PtsConfig::new(&self.url, &self.username, &self.password)?;
        config.timeout = Duration::from_millis(self.timeout_ms);
        config.accept_invalid_certs = self.accept_invalid_certs;
        Ok(config)
    }

    fn poller_config(&self) -> PollerConfig {
        let defaults = PollerConfig::default();
        PollerConfig {
            interval: Duration::from_millis(self.interval_ms),
            tank_interval: Duration::from_millis(self.tank_interval_ms),
            pumps: if self.pumps.is_empty() { defaults.pumps } else { self.pumps.clone() },
            probes: if self.probes.is_empty() { defaults.probes } else { self.probes.clone() },
        }
    }

    fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            policy: match self.on_second_authorization {
                Policy::Reject => AuthorizationPolicy::Reject,
                Policy::Supersede => AuthorizationPolicy::Supersede,
            },
            ..ReconcileConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    env_logger::init();
    let args = Args::parse();

    log::info!("[MAIN] mode {:?}, controller {}", args.mode, args.url);

    let store = JsonlTransactionStore::open(&args.transactions_file)
        .await
        .context("opening transaction file")?;
    let hub = build_hub(Arc::new(store), args.reconcile_config());

    match args.mode {
        Mode::Poll => run_poll(&args, hub).await,
        Mode::Once => run_once(&args, hub).await,
        Mode::Identify => run_identify(&args, hub).await,
        Mode::Ingest => run_ingest(&args, hub).await,
    }
}

async fn run_poll(args: &Args, hub: Arc<StationHub>) -> Result<()> {
    let client = Arc::new(PtsClient::new(&args.pts_config()?)?);
    let poller = Poller::new(client, hub.clone(), args.poller_config());
    let sweeper = hub.reconciler().spawn_sweeper();

    let mut events = hub.events().subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => log::warn!("[MAIN] cannot serialize event: {}", e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("[MAIN] event printer lagged, {} events dropped", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    poller.start();
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    log::info!("[MAIN] shutting down");

    poller.stop();
    sweeper.abort();
    printer.abort();

    let stats = poller.stats();
    println!("-----------------------------------");
    println!("Cycles:           {}", stats.cycles);
    println!("Failed cycles:    {}", stats.failed_cycles);
    println!("Skipped ticks:    {}", stats.skipped_ticks);
    println!("Packet errors:    {}", stats.hard_packet_errors);
    println!("Not configured:   {}", stats.not_configured_packets);
    println!("Pending:          {}", hub.reconciler().pending_transactions().len());
    println!("-----------------------------------");
    Ok(())
}

async fn run_once(args: &Args, hub: Arc<StationHub>) -> Result<()> {
    let client = Arc::new(PtsClient::new(&args.pts_config()?)?);
    let poller = Poller::new(client, hub.clone(), args.poller_config());

    let report = poller.poll_cycle(0).await?;
    print_status(&hub, &report)
}

async fn run_identify(args: &Args, hub: Arc<StationHub>) -> Result<()> {
    let client = Arc::new(PtsClient::new(&args.pts_config()?)?);
    let forecourt = Forecourt::new(client, hub);

    let id = forecourt.configuration_identifier().await?;
    println!("{}", serde_json::to_string_pretty(&id)?);
    Ok(())
}

async fn run_ingest(args: &Args, hub: Arc<StationHub>) -> Result<()> {
    let config = PushConfig {
        secret: args.push_secret.clone(),
    };
    let ingestor = PushIngestor::from_config(hub.clone(), &config)?;

    let mut body = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut body)
        .await
        .context("reading push body from stdin")?;

    let report = ingestor.ingest_raw(&body, args.signature.as_deref())?;
    log::info!(
        "[MAIN] push: {} processed, {} unprocessed, {} failed",
        report.processed(),
        report.unprocessed(),
        report.failed()
    );
    println!("{}", serde_json::to_string(&report.ack_envelope())?);
    Ok(())
}

fn print_status(hub: &StationHub, report: &CycleReport) -> Result<()> {
    for status in hub.store().pumps().values() {
        println!("{}", serde_json::to_string(status)?);
    }
    for tank in hub.store().tanks().values() {
        println!("{}", serde_json::to_string(tank)?);
    }
    println!(
        "-- cycle took {:?}, {} packet errors, {} not configured",
        report.elapsed, report.hard_errors, report.not_configured
    );
    Ok(())
}
