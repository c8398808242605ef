//! Binary entrypoint for the devlink CLI.
//!
//! Commands:
//! - `ports` - list available serial ports
//! - `ping --port <path>` - round-trip liveness probe
//! - `info --port <path>` - query system_info and version
//! - `monitor --port <path>` - stream raw frames and variable updates
//! - `ota --port <path> <file>` - upload a file with progress
//! - `init` - create a starter `config.toml`
//!
//! See the library crate docs for module-level details: `devlink::`.
use anyhow::Result;
use clap::{Parser, Subcommand};

use devlink::config::Config;

#[derive(Parser)]
#[command(name = "devlink")]
#[command(about = "Command/response link to serial-attached MicroPython and Arduino devices")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,
    /// Send a ping and report the round trip
    Ping {
        /// Device serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
    },
    /// Query device and firmware information
    Info {
        #[arg(short, long)]
        port: String,
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
    },
    /// Stream raw frames, variable updates, and state changes to stdout
    Monitor {
        #[arg(short, long)]
        port: String,
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
        /// Also poll this ADC pin periodically
        #[arg(long)]
        adc: Option<u8>,
    },
    /// Upload a file to the device over the OTA sub-protocol
    Ota {
        #[arg(short, long)]
        port: String,
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
        /// Local file to upload
        file: String,
        /// Name to store on the device (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Initialize a new configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Ports => cmd_ports(),
        Commands::Ping { port, baud } => cmd_ping(pre_config, port, baud).await,
        Commands::Info { port, baud } => cmd_info(pre_config, port, baud).await,
        Commands::Monitor { port, baud, adc } => cmd_monitor(pre_config, port, baud, adc).await,
        Commands::Ota {
            port,
            baud,
            file,
            name,
        } => cmd_ota(pre_config, port, baud, file, name).await,
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            log::info!("Configuration file created at {}", cli.config);
            Ok(())
        }
    }
}

#[cfg(feature = "serial")]
mod device_commands {
    use super::*;
    use devlink::link::{DeviceLink, LinkOptions};
    use devlink::transport::SerialTransport;
    use devlink::Response;
    use std::sync::Arc;
    use std::time::Instant;

    fn build_link(config: Option<Config>, port: String, baud: u32) -> DeviceLink {
        let mut options = config
            .map(|c| c.link_options())
            .unwrap_or_else(LinkOptions::default);
        options.transport.port = port;
        options.transport.baud_rate = baud;
        DeviceLink::new(options, Arc::new(SerialTransport))
    }

    pub fn cmd_ports() -> Result<()> {
        let ports = devlink::transport::available_ports();
        if ports.is_empty() {
            println!("No serial ports found.");
            return Ok(());
        }
        for p in ports {
            let desc = [p.manufacturer, p.product]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            if desc.is_empty() {
                println!("{}", p.name);
            } else {
                println!("{}  ({})", p.name, desc);
            }
        }
        Ok(())
    }

    pub async fn cmd_ping(config: Option<Config>, port: String, baud: u32) -> Result<()> {
        let link = build_link(config, port, baud);
        if !link.connect().await? {
            return Ok(()); // user cancelled
        }
        let started = Instant::now();
        match link.send_command("ping", None).await {
            Ok(Response::Pong { uptime, .. }) => {
                println!(
                    "pong in {} ms (device uptime {} ms)",
                    started.elapsed().as_millis(),
                    uptime
                );
            }
            Ok(other) => println!("unexpected reply: {:?}", other),
            Err(e) => {
                link.disconnect().await;
                return Err(e.into());
            }
        }
        link.disconnect().await;
        Ok(())
    }

    pub async fn cmd_info(config: Option<Config>, port: String, baud: u32) -> Result<()> {
        let link = build_link(config, port, baud);
        if !link.connect().await? {
            return Ok(());
        }
        let info = link.send_command("system_info", None).await;
        let version = link.send_command("version", None).await;
        println!("system_info: {:?}", info);
        println!("version: {:?}", version);
        println!(
            "status: {}",
            serde_json::to_string_pretty(&link.get_status())?
        );
        link.disconnect().await;
        Ok(())
    }

    pub async fn cmd_monitor(
        config: Option<Config>,
        port: String,
        baud: u32,
        adc: Option<u8>,
    ) -> Result<()> {
        let link = build_link(config, port, baud);
        if !link.connect().await? {
            return Ok(());
        }
        let mut raw = link.subscribe_raw();
        let mut vars = link.subscribe_vars();
        let mut states = link.subscribe_states();
        let mut samples = link.subscribe_samples();
        if let Some(pin) = adc {
            link.start_adc_stream(pin, std::time::Duration::from_millis(1000));
        }
        println!("Monitoring {} (ctrl-c to stop)...", link.get_status().port);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = raw.recv() => {
                    if let Ok(line) = line { println!("<< {}", line); }
                }
                update = vars.recv() => {
                    if let Ok(u) = update { println!("var {} = {}", u.name, u.value); }
                }
                state = states.recv() => {
                    if let Ok(s) = state { println!("-- state: {}", s); }
                }
                sample = samples.recv() => {
                    if let Ok(s) = sample {
                        println!("adc pin {}: {} ({:.3} V)", s.pin, s.raw_value, s.voltage);
                    }
                }
            }
        }
        link.disconnect().await;
        Ok(())
    }

    pub async fn cmd_ota(
        config: Option<Config>,
        port: String,
        baud: u32,
        file: String,
        name: Option<String>,
    ) -> Result<()> {
        let content = tokio::fs::read(&file).await?;
        let device_name = name.unwrap_or_else(|| {
            std::path::Path::new(&file)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.clone())
        });
        let link = build_link(config, port, baud);
        if !link.connect().await? {
            return Ok(());
        }
        println!("Uploading {} ({} bytes)...", device_name, content.len());
        let progress: devlink::ProgressCallback = Box::new(|fraction: f32| {
            print!("\r{:5.1}%", fraction * 100.0);
            use std::io::Write;
            let _ = std::io::stdout().flush();
        });
        let outcome = link.ota_update(&device_name, &content, Some(progress)).await;
        println!();
        link.disconnect().await;
        match outcome {
            Ok(done) => {
                println!("done: {} bytes written", done.size);
                if done.reboot_required {
                    println!("note: device reboot required for the new file to take effect");
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(feature = "serial")]
use device_commands::{cmd_info, cmd_monitor, cmd_ota, cmd_ping, cmd_ports};

#[cfg(not(feature = "serial"))]
mod device_commands_stub {
    use super::*;

    fn unsupported() -> Result<()> {
        eprintln!("Error: this command requires the 'serial' feature.");
        eprintln!("Compile with: cargo build --features serial");
        std::process::exit(2);
    }

    pub fn cmd_ports() -> Result<()> {
        unsupported()
    }
    pub async fn cmd_ping(_c: Option<Config>, _p: String, _b: u32) -> Result<()> {
        unsupported()
    }
    pub async fn cmd_info(_c: Option<Config>, _p: String, _b: u32) -> Result<()> {
        unsupported()
    }
    pub async fn cmd_monitor(_c: Option<Config>, _p: String, _b: u32, _a: Option<u8>) -> Result<()> {
        unsupported()
    }
    pub async fn cmd_ota(
        _c: Option<Config>,
        _p: String,
        _b: u32,
        _f: String,
        _n: Option<String>,
    ) -> Result<()> {
        unsupported()
    }
}

#[cfg(not(feature = "serial"))]
use device_commands_stub::{cmd_info, cmd_monitor, cmd_ota, cmd_ping, cmd_ports};

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the config level
    let level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);
    builder.write_style(if atty::is(atty::Stream::Stdout) {
        env_logger::WriteStyle::Auto
    } else {
        env_logger::WriteStyle::Never
    });
    builder.format(|fmt, record| {
        writeln!(
            fmt,
            "{} [{}] {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            record.level(),
            record.args()
        )
    });
    let _ = builder.try_init();
}
