use crate::mqtt;
use antrabms_lib::coordinator::MAX_CONFIGURED_BATTERIES;
use antrabms_lib::protocol::{BAUD_RATES, DEFAULT_BAUD_RATE, MAX_GROUP};
use clap::{Parser, Subcommand};
use clap_num::number_range;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn parse_baud_rate(s: &str) -> Result<u32, String> {
    let baud_rate: u32 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if BAUD_RATES.contains(&baud_rate) {
        Ok(baud_rate)
    } else {
        Err(format!("baud rate must be one of {BAUD_RATES:?}"))
    }
}

fn parse_group(s: &str) -> Result<u8, String> {
    number_range(s, 0, MAX_GROUP)
}

fn parse_batteries(s: &str) -> Result<u8, String> {
    number_range(s, 1, MAX_CONFIGURED_BATTERIES)
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// List the serial ports found on this system
    ListPorts,
    /// Show the protocol version reported by the BMS
    Version,
    /// Read the group header and all batteries once
    Read {
        /// Print the snapshot as JSON instead of a table
        #[clap(long, action)]
        json: bool,
    },
    /// Run in daemon mode, periodically polling the BMS and outputting the data
    Daemon {
        /// Output destination for the data
        #[command(subcommand)]
        output: DaemonOutput,
        /// Interval between poll cycles (e.g., "30s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "30s")]
        interval: Duration,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously poll and print the data to the standard output (console).
    Console,
    /// Continuously poll and publish the data to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Simple)]
        format: MqttFormat,
    },
}

const fn about_text() -> &'static str {
    "antra bms command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,

    /// Serial baud rate
    #[arg(short, long, value_parser = parse_baud_rate, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud_rate: u32,

    /// Group number of the battery stack (0 for a single group)
    #[arg(short, long, value_parser = parse_group, default_value_t = 0)]
    pub group: u8,

    /// Number of batteries in the group
    #[arg(long, value_parser = parse_batteries, default_value_t = 4)]
    pub batteries: u8,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Time to wait for a valid reply (e.g., "2s", "2s 500ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "2s")]
    pub timeout: Duration,

    // The BMS does not answer reliably when polled faster than every 850ms
    /// Delay between sending a command and reading the reply (e.g., "900ms", "1s")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "900ms")]
    pub delay: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol() {
        let args = CliArgs::parse_from(["antrabms", "read"]);
        assert_eq!(args.baud_rate, 9600);
        assert_eq!(args.group, 0);
        assert_eq!(args.batteries, 4);
        assert_eq!(args.timeout, Duration::from_secs(2));
        assert_eq!(args.delay, Duration::from_millis(900));
        assert_eq!(args.command, CliCommands::Read { json: false });
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CliArgs::try_parse_from(["antrabms", "--baud-rate", "4800", "read"]).is_err());
        assert!(CliArgs::try_parse_from(["antrabms", "--group", "8", "read"]).is_err());
        assert!(CliArgs::try_parse_from(["antrabms", "--batteries", "0", "read"]).is_err());
        assert!(CliArgs::try_parse_from(["antrabms", "--batteries", "16", "read"]).is_err());
        let args =
            CliArgs::try_parse_from(["antrabms", "-b", "115200", "--batteries", "15", "version"])
                .unwrap();
        assert_eq!(args.baud_rate, 115200);
        assert_eq!(args.batteries, 15);
    }

    #[test]
    fn daemon_mqtt_arguments() {
        let args = CliArgs::parse_from([
            "antrabms", "daemon", "--interval", "1m", "mqtt", "--format", "json",
        ]);
        assert_eq!(
            args.command,
            CliCommands::Daemon {
                output: DaemonOutput::Mqtt {
                    config_file: "mqtt.yaml".to_string(),
                    format: MqttFormat::Json,
                },
                interval: Duration::from_secs(60),
            }
        );
    }
}
