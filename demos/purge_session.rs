//! Example: Run a purge on the nearest purge probe
//!
//! Connects with the full pre-checks (firmware version and calibration due),
//! records the starting conditions, starts a purge and stops it on Ctrl+C.
//!
//! Run with: cargo run --example purge_session

use preddio_ble::{
    ControllerProfile, EquipmentEvent, EquipmentManager, EquipmentState, PurgeMode, Result,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("preddio_ble=info".parse().unwrap()),
        )
        .init();

    let manager = EquipmentManager::new(ControllerProfile::Purge).await?;
    manager.start_scan().await?;

    println!("Looking for purge probes...");
    tokio::time::sleep(Duration::from_secs(5)).await;

    let Some(entry) = manager.nearest_equipment() else {
        println!("No purge probe found");
        manager.shutdown().await?;
        return Ok(());
    };
    let serial = entry.reading.serial_number().to_string();
    println!("Connecting to {}", serial);

    let mut events = manager.subscribe();
    manager.connect(&serial, true).await?;

    let state = manager
        .wait_for_state(
            |s| {
                matches!(
                    s,
                    EquipmentState::CharacteristicsDiscovered
                        | EquipmentState::NeedsUpdate
                        | EquipmentState::NeedsCalibration(_)
                        | EquipmentState::Failed
                )
            },
            Duration::from_secs(15),
        )
        .await?;

    match state {
        EquipmentState::NeedsUpdate => {
            println!("Firmware update available, run the firmware_update example. Skipping for now.");
            manager.decline_update().await?;
        }
        EquipmentState::NeedsCalibration(since) => {
            println!("Sensor last calibrated {}, consider calibrating", since);
        }
        EquipmentState::Failed => {
            println!("Connection failed");
            manager.shutdown().await?;
            return Ok(());
        }
        _ => {}
    }

    manager.fetch_purge_oxygen().await?;
    manager
        .wait_for_state(|s| *s == EquipmentState::ReadyToStart, Duration::from_secs(10))
        .await?;

    manager.start_purge(PurgeMode::Purge).await?;
    println!("Purge started. Press Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(EquipmentEvent::ActivityInput(input)) => {
                    println!(
                        "Start conditions: O2 {:?}%  pressure {:?} mbar  atmospheric {:?} mbar",
                        input.start_oxygen_percent,
                        input.start_pressure_mbar,
                        input.start_atmospheric_pressure_mbar
                    );
                }
                Ok(EquipmentEvent::ReadingUpdated { reading, .. })
                    if reading.serial_number() == serial =>
                {
                    println!("{:?}", reading.measurement());
                }
                Ok(EquipmentEvent::StateChanged(state)) => println!("State: {}", state),
                Ok(_) => {}
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping purge...");
                manager.stop_equipment().await?;
                manager
                    .wait_for_state(
                        |s| *s == EquipmentState::CharacteristicUpdated,
                        Duration::from_secs(5),
                    )
                    .await?;
                break;
            }
        }
    }

    manager.shutdown().await?;
    Ok(())
}
