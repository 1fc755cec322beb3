// PWM controller: UDP session, liveness monitor and operator console for a four-channel PWM device.

mod config;
mod console;
mod controller;
mod dispatch;
mod liveness;
mod transport;

#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use pwm_core::ConnectivityState;

use crate::config::Config;
use crate::controller::Controller;
use crate::transport::Session;

#[derive(Parser)]
#[command(name = "pwm-linux")]
#[command(about = "Adjust PWM duty cycles on a networked microcontroller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (default: ~/.config/pwm-controller/config.toml, then /etc/pwm-controller/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Device host, overrides config and environment
    #[arg(long, global = true)]
    host: Option<String>,

    /// Device UDP port, overrides config and environment
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Start without probing the device
    #[arg(long, global = true)]
    offline: bool,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive console with background liveness monitoring (default)
    Run,
    /// Probe the device once; exit status 1 when it does not answer
    Ping,
    /// Request and print the device's pin configuration
    Show {
        /// Print the pin table as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set one pin's duty cycle
    Set {
        /// Onboard pin label, e.g. 5
        pin: String,
        /// Duty cycle in percent, 0-100
        duty: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut cfg = config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(host) = cli.host.clone() {
        cfg.host = host;
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    cfg.offline |= cli.offline;

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        match cli.command.unwrap_or(Commands::Run) {
            Commands::Run => run(&cfg).await,
            Commands::Ping => ping(&cfg).await,
            Commands::Show { json } => show(&cfg, json).await,
            Commands::Set { pin, duty } => set(&cfg, &pin, &duty).await,
        }
    });
    // Stdin reads run on a blocking thread that cannot be interrupted.
    rt.shutdown_timeout(Duration::from_millis(200));
    result
}

fn init_logging(verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let base_level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    builder.parse_default_env();
    builder.format(|buf, record| {
        let ts = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S");
        writeln!(buf, "{} [{}] {}", ts, record.level(), record.args())
    });
    let _ = builder.try_init();
}

async fn run(cfg: &Config) -> Result<()> {
    info!("PWM controller v{}", env!("CARGO_PKG_VERSION"));
    let controller = Controller::start(cfg)
        .await
        .context("starting device session")?;
    let outcome = tokio::select! {
        r = console::run(&controller) => r.context("console input"),
        r = shutdown_signal() => r,
    };
    controller.shutdown().await;
    outcome
}

async fn session(cfg: &Config) -> Result<Session> {
    Session::connect(&cfg.host, cfg.port, cfg.timeout())
        .await
        .with_context(|| format!("opening session to {}:{}", cfg.host, cfg.port))
}

async fn ping(cfg: &Config) -> Result<()> {
    let session = session(cfg).await?;
    if liveness::probe_once(&session).await {
        println!("{} {}", session.peer(), ConnectivityState::Connected);
        Ok(())
    } else {
        bail!("no response from {}", session.peer())
    }
}

async fn show(cfg: &Config, json: bool) -> Result<()> {
    let session = session(cfg).await?;
    let pins = pwm_core::PinStore::new();
    liveness::refresh_config(&session, &pins)
        .await
        .context("requesting pin configuration")?;
    let table = pins.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
    } else {
        for (index, c) in table.iter().enumerate() {
            println!("[{}] pin {:>3}: {:>3}%", index, c.label, c.duty_cycle);
        }
    }
    Ok(())
}

async fn set(cfg: &Config, pin: &str, duty: &str) -> Result<()> {
    let duty: pwm_core::DutyCycle = duty.parse()?;
    let session = std::sync::Arc::new(session(cfg).await?);
    let dispatcher = dispatch::Dispatcher::new(session, cfg.update_ack.clone());
    let reply = dispatcher
        .send(pin, duty)
        .await
        .with_context(|| format!("setting pin {} to {}%", pin, duty))?;
    println!("pin {} set to {}% ({})", pin, duty, reply);
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    info!("shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_subcommand_is_run() {
        let cli = Cli::try_parse_from(["pwm-linux", "--offline"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.offline);
    }

    #[test]
    fn set_takes_raw_duty_text() {
        let cli = Cli::try_parse_from(["pwm-linux", "set", "5", "50.5", "-v"]).unwrap();
        match cli.command {
            Some(Commands::Set { pin, duty }) => {
                assert_eq!(pin, "5");
                assert!(duty.parse::<pwm_core::DutyCycle>().is_err());
            }
            _ => panic!("expected set"),
        }
        assert_eq!(cli.verbose, 1);
    }
}
