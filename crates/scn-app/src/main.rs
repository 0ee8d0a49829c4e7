//! SCN App - command-line client for the SCN middleware.
//!
//! Joins the local middleware as a service, runs service discovery, or
//! queries the PIAX sensor data service.

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use scn_core::config::{PiaxConfig, RpcConfig};
use scn_core::{DataEvent, PiaxAccessor, ScnManager, ScnManagerBuilder, SpatialQuery};
use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "scn-app")]
#[command(about = "Client for the SCN middleware and PIAX")]
struct Args {
    /// Rendezvous server of the SCN middleware
    #[arg(long, default_value_t = RpcConfig::initial_addr())]
    rendezvous: SocketAddr,

    /// Timeout of each middleware call, in seconds
    #[arg(long, default_value_t = RpcConfig::CLIENT_TIMEOUT.as_secs())]
    timeout: u64,

    /// PIAX server (host:port)
    #[arg(long, default_value = PiaxConfig::BASE)]
    piax_base: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join as a service and log inbound data until interrupted
    Join {
        /// Service name
        #[arg(long)]
        name: String,

        /// Service information (JSON)
        #[arg(long, default_value = "{}")]
        info: String,
    },
    /// Join a transient service and print the services matching a query
    Discover {
        /// Discovery query (JSON)
        #[arg(long, default_value = "{}")]
        query: String,
    },
    /// Print PIAX sensor values
    PiaxData {
        /// Field path to select, e.g. Weather/Temperature
        #[arg(long = "value")]
        values: Vec<String>,

        #[command(flatten)]
        query: QueryArgs,
    },
    /// Print PIAX sensors
    PiaxSensors {
        #[command(flatten)]
        query: QueryArgs,
    },
}

#[derive(ClapArgs, Debug)]
struct QueryArgs {
    /// Spatial filter method
    #[arg(long, default_value = PiaxConfig::DEFAULT_METHOD)]
    method: String,

    /// Spatial filter parameter (repeat for each)
    #[arg(long = "param", allow_negative_numbers = true)]
    params: Vec<f64>,
}

impl QueryArgs {
    fn to_query(&self) -> SpatialQuery {
        if self.params.is_empty() {
            SpatialQuery::new(self.method.clone(), PiaxConfig::DEFAULT_PARAMS.to_vec())
        } else {
            SpatialQuery::new(self.method.clone(), self.params.clone())
        }
    }
}

fn init_logging(debug: bool, log_file: Option<&PathBuf>) -> Result<()> {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact();

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

fn parse_json(text: &str, what: &str) -> Result<serde_json::Value> {
    serde_json::from_str(text).with_context(|| format!("Invalid {} JSON: {}", what, text))
}

fn manager_builder(args: &Args) -> Result<ScnManagerBuilder> {
    Ok(ScnManager::builder()
        .rendezvous_addr(args.rendezvous)
        .call_timeout(Duration::from_secs(args.timeout))
        .piax(PiaxAccessor::with_base(args.piax_base.clone())?))
}

async fn run_join(args: &Args, name: &str, info: &str) -> Result<()> {
    let info = parse_json(info, "service info")?;

    let listener = Arc::new(|event: DataEvent| {
        info!(
            "Received data ({} bytes, channel = {:?}): {}",
            event.size, event.channel_id, event.data
        );
    });
    let (scn, shutdown) = manager_builder(args)?
        .data_listener(listener)
        .connect()
        .await?;

    let service_id = scn.join_service(name, &info).await?;
    info!("Joined as {} (service ID = {})", name, service_id);

    scn_core::shutdown::finalize_on_signal(&[shutdown]).await?;
    info!("Finalized, exiting");
    Ok(())
}

async fn run_discover(args: &Args, query: &str) -> Result<()> {
    let query = parse_json(query, "discovery query")?;

    let (scn, shutdown) = manager_builder(args)?.connect().await?;
    let result = async {
        scn.join_service("scn-app-discovery", &serde_json::json!({}))
            .await?;
        scn.discovery_service(&query).await
    }
    .await;
    shutdown.finalize().await;

    let services = result?;
    info!("Discovery found {} service(s)", services.len());
    for service in services {
        println!("{}", service);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.log_file.as_ref())?;

    match &args.command {
        Command::Join { name, info } => run_join(&args, name, info).await,
        Command::Discover { query } => run_discover(&args, query).await,
        Command::PiaxData { values, query } => {
            let piax = PiaxAccessor::with_base(args.piax_base.clone())?;
            println!("{}", piax.get_data(values.as_slice(), &query.to_query()).await?);
            Ok(())
        }
        Command::PiaxSensors { query } => {
            let piax = PiaxAccessor::with_base(args.piax_base.clone())?;
            println!("{}", piax.get_sensors(&query.to_query()).await?);
            Ok(())
        }
    }
}
