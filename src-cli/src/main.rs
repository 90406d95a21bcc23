//! PEQ Link command-line front end
//!
//! Waits for the device, runs one command, then shuts the poller down.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::Receiver;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use peqlink_core::{
    Channel, ControllerConfig, DeviceController, Event, FilterKind, FilterParams, PersistResult,
    SystemStatus, CHANNELS,
};

#[derive(Parser, Debug)]
#[command(name = "peqlink", author, version, about = "Control a PEQ Link DSP over USB", long_about = None)]
struct Cli {
    /// JSON controller configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// How long to wait for the device before giving up, in milliseconds
    #[arg(long, default_value_t = 3000, global = true)]
    wait_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print status updates as they arrive
    Monitor {
        /// Stop after this many updates
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Read one band from the device
    GetFilter {
        /// Channel id (0-4) or code (INL, INR, OUTL, OUTR, SUB)
        #[arg(value_parser = parse_channel)]
        channel: u8,
        band: u8,
    },

    /// Write one band
    SetFilter {
        #[arg(value_parser = parse_channel)]
        channel: u8,
        band: u8,
        /// PK, LS, HS, LP, HP or flat
        kind: FilterKind,
        frequency: f32,
        q: f32,
        /// Gain in dB
        #[arg(allow_negative_numbers = true, default_value_t = 0.0)]
        gain: f32,
    },

    /// Show or set the global preamp in dB
    Preamp {
        #[arg(allow_negative_numbers = true)]
        value: Option<f32>,
    },

    /// Show or set master bypass
    Bypass { state: Option<Toggle> },

    /// Show or set an output channel's delay in milliseconds
    Delay {
        #[arg(value_parser = parse_channel)]
        channel: u8,
        ms: Option<f32>,
    },

    /// Save the active parameters to flash
    Save,

    /// Restore parameters from flash
    Load,

    /// Reset the device to factory defaults
    FactoryReset,

    /// Temperature, supply voltage and uptime
    Env,

    /// Read a channel's bands and print its magnitude response
    Curve {
        #[arg(value_parser = parse_channel)]
        channel: u8,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List the channel catalog
    Channels,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn parse_channel(s: &str) -> Result<u8, String> {
    if let Ok(id) = s.parse::<u8>() {
        return CHANNELS
            .get(id as usize)
            .map(|c| c.id)
            .ok_or_else(|| format!("no channel {id} (expected 0-{})", CHANNELS.len() - 1));
    }
    CHANNELS
        .iter()
        .find(|c| c.code.eq_ignore_ascii_case(s))
        .map(|c| c.id)
        .ok_or_else(|| format!("unknown channel '{s}'"))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "peqlink=debug" } else { "peqlink=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Channels = cli.command {
        print_channels();
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => ControllerConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ControllerConfig::default(),
    };

    let controller = DeviceController::with_default_backend(config)?;
    info!("Using {} backend", controller.backend_name());
    let events = controller.subscribe();
    controller.start_polling()?;

    let result = wait_connected(&controller, &events, Duration::from_millis(cli.wait_ms))
        .and_then(|()| run(&controller, &events, cli.command));

    controller.shutdown();
    result
}

fn wait_connected(controller: &DeviceController, events: &Receiver<Event>, wait: Duration) -> Result<()> {
    let deadline = Instant::now() + wait;
    while !controller.is_connected() {
        let Some(left) = deadline.checked_duration_since(Instant::now()) else {
            let reason = controller
                .connection_state()
                .last_error
                .unwrap_or_else(|| "timed out".into());
            bail!("Device not connected: {}", reason);
        };
        if let Ok(event) = events.recv_timeout(left) {
            debug!("{:?}", event);
        }
    }
    Ok(())
}

fn run(controller: &DeviceController, events: &Receiver<Event>, command: Commands) -> Result<()> {
    match command {
        Commands::Monitor { count } => monitor(events, count),

        Commands::GetFilter { channel, band } => {
            let params = controller.get_filter(channel, band)?;
            println!("{} band {}: {}", channel_code(channel), band, params);
            Ok(())
        }

        Commands::SetFilter {
            channel,
            band,
            kind,
            frequency,
            q,
            gain,
        } => {
            let params = FilterParams::new(kind, frequency, q, gain);
            controller.set_filter(channel, band, params)?;
            println!("{} band {}: {}", channel_code(channel), band, params);
            Ok(())
        }

        Commands::Preamp { value } => {
            if let Some(db) = value {
                controller.set_preamp(db)?;
            }
            println!("preamp {:+.2} dB", controller.get_preamp()?);
            Ok(())
        }

        Commands::Bypass { state } => {
            if let Some(state) = state {
                controller.set_bypass(matches!(state, Toggle::On))?;
            }
            let on = controller.get_bypass()?;
            println!("bypass {}", if on { "on" } else { "off" });
            Ok(())
        }

        Commands::Delay { channel, ms } => {
            if let Some(ms) = ms {
                controller.set_delay(channel, ms)?;
            }
            println!("{} delay {:.2} ms", channel_code(channel), controller.get_delay(channel)?);
            Ok(())
        }

        Commands::Save => report_persist("save", controller.save_params()?),
        Commands::Load => report_persist("load", controller.load_params()?),
        Commands::FactoryReset => report_persist("factory reset", controller.factory_reset()?),

        Commands::Env => {
            let env = controller.get_environment()?;
            println!("temperature  {:.2} °C", env.temperature_c);
            println!("supply       {:.3} V", env.supply_volts);
            println!("uptime       {} s", env.uptime_secs);
            Ok(())
        }

        Commands::Curve { channel, json } => {
            controller.read_channel(channel)?;
            let curve = controller.channel_response(channel)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&curve)?);
            } else {
                for point in curve {
                    println!("{:>10.1} Hz  {:>+8.2} dB", point.frequency, point.db);
                }
            }
            Ok(())
        }

        Commands::Channels => {
            print_channels();
            Ok(())
        }
    }
}

fn monitor(events: &Receiver<Event>, count: Option<usize>) -> Result<()> {
    let mut seen = 0;
    while count.map_or(true, |n| seen < n) {
        match events.recv() {
            Ok(Event::StatusUpdate(status)) => {
                println!("{}", format_status(&status));
                seen += 1;
            }
            Ok(Event::DeviceRemoved) => println!("device removed"),
            Ok(Event::Connected) => println!("device connected"),
            Ok(_) => {}
            Err(_) => return Err(anyhow!("event stream closed")),
        }
    }
    Ok(())
}

fn format_status(status: &SystemStatus) -> String {
    let meters: Vec<String> = CHANNELS
        .iter()
        .zip(status.peaks.iter())
        .map(|(ch, peak)| format!("{}:{:5.1}%", ch.code, peak * 100.0))
        .collect();
    format!(
        "{}  load {}% / {}%",
        meters.join(" "),
        status.core_loads[0],
        status.core_loads[1]
    )
}

fn report_persist(what: &str, result: PersistResult) -> Result<()> {
    if !result.is_ok() {
        bail!("{} failed: {}", what, result);
    }
    println!("{}: {}", what, result);
    Ok(())
}

fn channel_code(id: u8) -> &'static str {
    CHANNELS.get(id as usize).map_or("?", |c| c.code)
}

fn print_channels() {
    for Channel {
        id,
        name,
        code,
        link,
        band_capacity,
        is_output,
        color,
    } in CHANNELS.iter()
    {
        println!(
            "{id}  {code:<4}  {name:<16}  {link:<15}  {band_capacity} bands  {}  {color}",
            if *is_output { "delay" } else { "     " }
        );
    }

    // Kind names accepted by set-filter
    let kinds: Vec<&str> = FilterKind::ALL.iter().map(|k| k.short_name()).collect();
    println!("filter kinds: {}", kinds.join(" "));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channel() {
        assert_eq!(parse_channel("0"), Ok(0));
        assert_eq!(parse_channel("sub"), Ok(4));
        assert_eq!(parse_channel("OUTL"), Ok(2));
        assert!(parse_channel("7").is_err());
        assert!(parse_channel("front").is_err());
    }

    #[test]
    fn test_cli_parses_negative_gain() {
        let cli = Cli::try_parse_from(["peqlink", "set-filter", "outl", "3", "PK", "1000", "1.4", "-3.5"]).unwrap();
        match cli.command {
            Commands::SetFilter { channel, kind, gain, .. } => {
                assert_eq!(channel, 2);
                assert_eq!(kind, FilterKind::Peaking);
                assert_eq!(gain, -3.5);
            }
            other => panic!("parsed {:?}", other),
        }
    }

    #[test]
    fn test_format_status() {
        let status = SystemStatus {
            peaks: [1.0, 0.5, 0.0, 0.0, 0.0],
            core_loads: [12, 34],
        };
        let line = format_status(&status);
        assert!(line.starts_with("INL:100.0%"));
        assert!(line.ends_with("load 12% / 34%"));
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
