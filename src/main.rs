use anyhow::{Context, Result};
use antrabms_lib::coordinator::Coordinator;
use antrabms_lib::tokio_serial_async::AntraBMS;
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};

mod commandline;
mod daemon;
mod mqtt;

use commandline::{CliArgs, CliCommands};

fn logging_init(loglevel: LevelFilter) -> Result<LoggerHandle> {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .with_context(|| "Cannot init logging")?
        .start()
        .with_context(|| "Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    Ok(log_handle)
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports().with_context(|| "Cannot enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => println!(
                "{} (USB {:04x}:{:04x} {})",
                port.port_name,
                usb.vid,
                usb.pid,
                usb.product.unwrap_or_default()
            ),
            _ => println!("{}", port.port_name),
        }
    }
    Ok(())
}

fn check_device(device: &str) {
    match serialport::available_ports() {
        Ok(ports) if ports.iter().any(|p| p.port_name == device) => {}
        Ok(_) => warn!("Serial port '{device}' not found in the list of available ports"),
        Err(e) => warn!("Cannot enumerate serial ports: {e}"),
    }
}

fn open_bms(args: &CliArgs) -> Result<AntraBMS> {
    check_device(&args.device);
    let mut bms = AntraBMS::new(&args.device, args.baud_rate)
        .with_context(|| format!("Cannot open serial port '{}'", args.device))?;
    bms.set_timeout(args.timeout)?;
    bms.set_delay(args.delay);
    bms.set_group(args.group)
        .with_context(|| format!("Invalid group {}", args.group))?;
    Ok(bms)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter())?;

    match &args.command {
        CliCommands::ListPorts => list_ports()?,
        CliCommands::Version => {
            let coordinator = Coordinator::new(open_bms(&args)?, args.batteries);
            let version = coordinator
                .protocol_version()
                .await
                .with_context(|| "Cannot get protocol version")?;
            println!("Protocol version: {version}");
        }
        CliCommands::Read { json } => {
            let coordinator = Coordinator::new(open_bms(&args)?, args.batteries);
            let snapshot = coordinator
                .try_refresh()
                .await
                .with_context(|| "Cannot read analog data")?;
            if *json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&*snapshot)
                        .with_context(|| "Cannot serialize snapshot")?
                );
            } else {
                daemon::print_snapshot(&snapshot);
            }
        }
        CliCommands::Daemon { output, interval } => {
            let coordinator = Coordinator::new(open_bms(&args)?, args.batteries);
            daemon::run(coordinator, output.clone(), *interval).await?;
        }
    }

    Ok(())
}
