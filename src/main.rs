use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use mfc::{ControllerConfig, FlowController, Model, PhysicalReading, Simulator};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ModelArg {
    /// Modbus-TCP, integer registers scaled to full scale
    Scaled,
    /// Modbus-TCP, floating-point registers
    Float,
    /// Legacy EtherCAT controller
    Ethercat,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Control an MKS mass flow controller")]
struct Args {
    /// IP address (or ip:port) of the controller, or bus position for EtherCAT
    #[arg(env = "MFC_ADDRESS")]
    address: Option<String>,

    /// Controller model
    #[arg(short, long, value_enum, env = "MFC_MODEL", default_value_t = ModelArg::Float)]
    model: ModelArg,

    /// Full-scale flow of the controller
    #[arg(long, env = "MFC_MAX_FLOW", default_value_t = 10.0)]
    max_flow: f64,

    /// Controller ships with analog setpoints enabled
    #[arg(long, default_value_t = false)]
    analog: bool,

    /// Set the flow setpoint
    #[arg(short, long)]
    set: Option<f64>,

    /// Select the gas by name (e.g. N2)
    #[arg(short = 'g', long)]
    set_gas: Option<String>,

    /// Select the front display: ip, flow or temperature
    #[arg(short = 'd', long)]
    set_display: Option<String>,

    /// Open the valve fully
    #[arg(long, conflicts_with_all = ["close", "set"])]
    open: bool,

    /// Close the valve
    #[arg(long, conflicts_with = "set")]
    close: bool,

    /// Modbus-TCP port
    #[arg(short, long, default_value_t = mfc::DEFAULT_MODBUS_PORT)]
    port: u16,

    /// Modbus unit identifier
    #[arg(short, long, default_value_t = mfc::DEFAULT_UNIT_ID)]
    unit_id: u8,

    /// Per-exchange timeout in milliseconds
    #[arg(short, long, env = "MFC_TIMEOUT_MS", default_value_t = 1000)]
    timeout_ms: u64,

    /// Keep polling and print one JSON line per reading
    #[arg(long, default_value_t = false)]
    stream: bool,

    /// Poll interval in milliseconds for --stream
    #[arg(short = 'i', long, default_value_t = 1000)]
    interval_ms: u64,

    /// Talk to an in-memory controller instead of hardware
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Log more (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn model(args: &Args) -> Model {
    match args.model {
        ModelArg::Scaled => Model::Scaled {
            max_flow: args.max_flow,
        },
        ModelArg::Float => Model::Float {
            max_flow: args.max_flow,
            analog: args.analog,
        },
        ModelArg::Ethercat => Model::Ethercat {
            max_flow: args.max_flow,
        },
    }
}

fn resolve_config(args: &Args) -> anyhow::Result<ControllerConfig> {
    let model = model(args);
    let config = if args.simulate {
        ControllerConfig::simulated(Simulator::new(model))
    } else if args.model == ModelArg::Ethercat {
        let position = match &args.address {
            Some(address) => address
                .parse::<u16>()
                .with_context(|| format!("invalid EtherCAT bus position '{address}'"))?,
            None => 0,
        };
        ControllerConfig::ethercat(position, args.max_flow)
    } else {
        let Some(address) = &args.address else {
            bail!("a device address is required (or set MFC_ADDRESS)");
        };
        if let Ok(socket) = address.parse::<SocketAddr>() {
            ControllerConfig::tcp(socket.ip(), model).with_port(socket.port())
        } else {
            let ip = address
                .parse::<IpAddr>()
                .with_context(|| format!("invalid device address '{address}'"))?;
            ControllerConfig::tcp(ip, model).with_port(args.port)
        }
    };
    Ok(config
        .with_unit_id(args.unit_id)
        .with_timeout(Duration::from_millis(args.timeout_ms)))
}

async fn apply_commands(mfc: &FlowController, args: &Args) -> anyhow::Result<()> {
    if let Some(gas) = &args.set_gas {
        mfc.set_gas(gas).await.context("could not set gas")?;
    }
    if let Some(setpoint) = args.set {
        mfc.set(setpoint).await.context("could not set flow")?;
    }
    if args.open {
        mfc.open().await.context("could not open valve")?;
    }
    if args.close {
        mfc.close().await.context("could not close valve")?;
    }
    if let Some(field) = &args.set_display {
        mfc.set_display(field).await.context("could not set display")?;
    }
    Ok(())
}

/// JSON for one reading, keys sorted.
fn render(reading: &PhysicalReading, pretty: bool) -> serde_json::Result<String> {
    let value = serde_json::to_value(reading)?;
    if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
}

async fn stream(mfc: &FlowController, interval: Duration) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
        let reading = match mfc.get().await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("poll failed: {}", e);
                PhysicalReading::disconnected(mfc.max_flow())
            }
        };
        println!("{}", render(&reading, false)?);
    }
}

async fn run(args: &Args, config: ControllerConfig) -> anyhow::Result<()> {
    let mfc = FlowController::connect(config)
        .await
        .context("could not connect to device")?;

    let result = async {
        apply_commands(&mfc, args).await?;
        if args.stream {
            stream(&mfc, Duration::from_millis(args.interval_ms.max(1))).await
        } else {
            let reading = mfc.get().await.context("could not read device")?;
            println!("{}", render(&reading, true)?);
            Ok(())
        }
    }
    .await;

    if let Err(e) = mfc.disconnect().await {
        warn!("disconnect failed: {}", e);
    }
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let config = resolve_config(&args)?;
    run(&args, config).await
}
