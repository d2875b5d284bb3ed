//! Example: Update the firmware of the nearest DO probe
//!
//! Loads `do_v1_1_0.bin` from the directory given as the first argument
//! (default `firmware/`) and flashes it if the probe reports an older version.
//!
//! Run with: cargo run --example firmware_update -- ./firmware

use preddio_ble::{
    ControllerProfile, DirectoryFirmwareSource, EquipmentManager, EquipmentState, Result,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("preddio_ble=debug".parse().unwrap()),
        )
        .init();

    let dir = std::env::args().nth(1).unwrap_or_else(|| "firmware".to_string());
    let source = DirectoryFirmwareSource::new(dir);

    let manager = EquipmentManager::new(ControllerProfile::DissolvedOxygen).await?;
    manager.start_scan().await?;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let Some(entry) = manager.nearest_equipment() else {
        println!("No DO probe found");
        manager.shutdown().await?;
        return Ok(());
    };

    let _handle = manager.on_state_changed(|state| {
        if let EquipmentState::Updating(percent) = state {
            println!("  {}%", percent);
        }
    });

    manager.connect(entry.reading.serial_number(), true).await?;
    let state = manager
        .wait_for_state(
            |s| {
                matches!(
                    s,
                    EquipmentState::NeedsUpdate
                        | EquipmentState::CharacteristicsDiscovered
                        | EquipmentState::Failed
                )
            },
            Duration::from_secs(15),
        )
        .await?;

    if state != EquipmentState::NeedsUpdate {
        println!("No update needed ({})", state);
        manager.shutdown().await?;
        return Ok(());
    }

    println!("Flashing firmware...");
    manager.update_from_source(&source).await?;

    let state = manager
        .wait_for_state(
            |s| matches!(s, EquipmentState::UpdateClosed | EquipmentState::UpdateFailed),
            Duration::from_secs(600),
        )
        .await?;
    println!("Update finished: {}", state);

    manager.shutdown().await?;
    Ok(())
}
