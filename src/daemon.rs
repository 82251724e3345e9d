use anyhow::{Context, Result};
use antrabms_lib::analog::BatteryRecord;
use antrabms_lib::coordinator::Coordinator;
use antrabms_lib::labels::flagged_cells;
use antrabms_lib::sensors::{battery_readings, group_readings, Reading};
use antrabms_lib::snapshot::Snapshot;
use log::{error, info, warn};
use serde_json::json;
use std::time::Duration;

use crate::{commandline, mqtt};

fn format_value(value: f64) -> String {
    ((value * 1000.0).round() / 1000.0).to_string()
}

fn format_reading(reading: &Reading) -> String {
    match reading.unit {
        Some(unit) => format!("{}: {} {unit}", reading.name, format_value(reading.value)),
        None => format!("{}: {}", reading.name, format_value(reading.value)),
    }
}

/// Decoded status and protection words of a battery as (name, text) pairs.
fn battery_flags(battery: &BatteryRecord) -> Vec<(String, String)> {
    let status = &battery.status;
    let mut flags = vec![
        ("voltage_status".to_string(), status.voltage_flags().join(", ")),
        ("current_status".to_string(), status.current_flags().join(", ")),
        ("temperature_status".to_string(), status.temperature_flags().join(", ")),
        ("alarm_status".to_string(), status.alarm_flags().join(", ")),
        ("fet_status".to_string(), status.fet_status().labels().join(", ")),
    ];
    for (name, word) in battery.protection.masks() {
        let cells: Vec<String> = flagged_cells(word).iter().map(u8::to_string).collect();
        flags.push((
            name.to_lowercase().replace(' ', "_"),
            cells.join(", "),
        ));
    }
    flags
}

pub fn print_snapshot(snapshot: &Snapshot) {
    println!("--- Group ---");
    for reading in group_readings(&snapshot.group) {
        println!("{}", format_reading(&reading));
    }
    println!("Reserved: {}", snapshot.group.reserved);
    for (number, battery) in &snapshot.batteries {
        println!("--- Battery {number} ---");
        for reading in battery_readings(battery) {
            println!("{}", format_reading(&reading));
        }
        for (name, text) in battery_flags(battery) {
            println!("{name}: {text}");
        }
    }
    if !snapshot.failed_batteries.is_empty() {
        println!("Unreadable batteries: {:?}", snapshot.failed_batteries);
    }
}

async fn publish_simple_format(publisher: &mqtt::MqttPublisher, snapshot: &Snapshot) {
    let base_topic = publisher.topic();
    let mut messages: Vec<(String, String)> = group_readings(&snapshot.group)
        .into_iter()
        .map(|r| (format!("{base_topic}/group/{}", r.key), format_value(r.value)))
        .collect();
    for (number, battery) in &snapshot.batteries {
        let battery_topic = format!("{base_topic}/battery_{number}");
        messages.extend(
            battery_readings(battery)
                .into_iter()
                .map(|r| (format!("{battery_topic}/{}", r.key), format_value(r.value))),
        );
        messages.extend(
            battery_flags(battery)
                .into_iter()
                .map(|(name, text)| (format!("{battery_topic}/{name}"), text)),
        );
    }
    for (topic, payload) in messages {
        if let Err(e) = publisher.publish(&topic, payload).await {
            error!("Failed to publish message to topic {topic}: {e}");
        }
    }
}

async fn publish_json_format(publisher: &mqtt::MqttPublisher, snapshot: &Snapshot) -> Result<()> {
    let payload = json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "snapshot": snapshot,
    });
    let payload =
        serde_json::to_string(&payload).with_context(|| "Failed to serialize data to JSON")?;
    info!("MQTT output: Attempting to publish data: {payload}");
    publisher.publish(publisher.topic(), payload).await
}

pub async fn run(
    coordinator: Coordinator,
    output: commandline::DaemonOutput,
    interval: Duration,
) -> Result<()> {
    info!("Starting daemon mode: output={output:?}, interval={interval:?}");

    let mut mqtt_publisher: Option<mqtt::MqttPublisher> = None;

    if let commandline::DaemonOutput::Mqtt { config_file, .. } = &output {
        let config = mqtt::MqttConfig::load(config_file)
            .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
        info!("Successfully loaded MQTT config from {config_file}: {config:?}");
        let publisher =
            mqtt::MqttPublisher::new(config).with_context(|| "Failed to create MQTT publisher")?;
        info!("MQTT Publisher created successfully.");
        mqtt_publisher = Some(publisher);
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, stopping daemon");
                return Ok(());
            }
        }

        let Some(snapshot) = coordinator.refresh().await else {
            warn!("No data received from the BMS yet");
            continue;
        };

        match &output {
            commandline::DaemonOutput::Console => {
                println!("--- Data at {} ---", chrono::Local::now().to_rfc3339());
                print_snapshot(&snapshot);
                println!("--------------------------");
            }
            commandline::DaemonOutput::Mqtt { format, .. } => {
                if let Some(publisher) = &mqtt_publisher {
                    match format {
                        commandline::MqttFormat::Json => {
                            if let Err(e) = publish_json_format(publisher, &snapshot).await {
                                error!("Failed to publish data to MQTT: {e:?}");
                            }
                        }
                        commandline::MqttFormat::Simple => {
                            publish_simple_format(publisher, &snapshot).await;
                        }
                    }
                } else {
                    warn!(
                        "MQTT output selected, but publisher is not initialized. Skipping publish."
                    );
                }
            }
        }
    }
}
