//! Basic example: Discover nearby Preddio equipment
//!
//! Run with: cargo run --example discover_equipment -- [purge|chiller|do]

use preddio_ble::{ControllerProfile, EquipmentManager, Measurement, Result};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("preddio_ble=debug".parse().unwrap()),
        )
        .init();

    let profile = match std::env::args().nth(1).as_deref() {
        Some("chiller") => ControllerProfile::Chiller,
        Some("do") => ControllerProfile::DissolvedOxygen,
        _ => ControllerProfile::Purge,
    };

    println!("Starting discovery of {} equipment...\n", profile);

    let manager = EquipmentManager::new(profile).await?;

    let _handle = manager.on_reading(|reading| {
        println!(
            "{} {} RSSI {:?} dBm, signal {:?}",
            reading.kind(),
            reading.serial_number(),
            reading.rssi(),
            reading.signal_strength()
        );

        match reading.measurement() {
            Measurement::Purge(m) => println!(
                "  O2 {:?}%  pressure {:?}  running {}",
                m.oxygen_percent,
                m.pressure,
                m.duration_text()
            ),
            Measurement::Chiller(m) => println!(
                "  {:?}°C ({:?}°F)",
                m.temperature_celsius,
                m.temperature_fahrenheit()
            ),
            Measurement::DissolvedOxygen(m) => println!(
                "  DO {:?}  {:?}°C  running {}",
                m.oxygen(),
                m.temperature_celsius,
                m.duration_text()
            ),
        }
    });

    manager.start_scan().await?;

    println!("Scanning for 30 seconds...\n");
    tokio::time::sleep(Duration::from_secs(30)).await;

    println!("\n=== Summary ===");
    for entry in manager.equipment() {
        println!(
            "  {} {} on {} ({} bars)",
            entry.reading.kind(),
            entry.reading.serial_number(),
            entry.device,
            entry.reading.signal_strength().bars()
        );
    }

    manager.shutdown().await?;
    Ok(())
}
