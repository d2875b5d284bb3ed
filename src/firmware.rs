//! Firmware images for OTA updates.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Firmware image shipped for an equipment kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FirmwareImage {
    /// Purge probe firmware 1.4.0.
    Purge,
    /// DO probe firmware 1.1.0.
    DissolvedOxygen,
}

impl FirmwareImage {
    /// Image name, without extension.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Purge => "purge_v1_4_0",
            Self::DissolvedOxygen => "do_v1_1_0",
        }
    }

    /// File name of the image.
    pub fn file_name(&self) -> String {
        format!("{}.bin", self.name())
    }
}

/// Source of firmware images.
#[async_trait]
pub trait FirmwareSource: Send + Sync {
    /// Load the full image.
    async fn load(&self, image: FirmwareImage) -> Result<Bytes>;
}

/// Loads `<dir>/<image>.bin` from disk.
#[derive(Debug, Clone)]
pub struct DirectoryFirmwareSource {
    dir: PathBuf,
}

impl DirectoryFirmwareSource {
    /// Read images from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl FirmwareSource for DirectoryFirmwareSource {
    async fn load(&self, image: FirmwareImage) -> Result<Bytes> {
        let path = self.dir.join(image.file_name());
        debug!("Loading firmware from {}", path.display());

        let data = tokio::fs::read(&path).await?;
        if data.is_empty() {
            return Err(Error::Firmware {
                name: image.name().to_string(),
                reason: "image is empty".to_string(),
            });
        }

        info!("Loaded {} ({} bytes)", image.name(), data.len());
        Ok(Bytes::from(data))
    }
}

/// In-memory images.
#[derive(Debug, Clone, Default)]
pub struct StaticFirmware {
    images: HashMap<FirmwareImage, Bytes>,
}

impl StaticFirmware {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an image.
    pub fn with_image(mut self, image: FirmwareImage, data: impl Into<Bytes>) -> Self {
        self.images.insert(image, data.into());
        self
    }
}

#[async_trait]
impl FirmwareSource for StaticFirmware {
    async fn load(&self, image: FirmwareImage) -> Result<Bytes> {
        self.images
            .get(&image)
            .filter(|data| !data.is_empty())
            .cloned()
            .ok_or_else(|| Error::Firmware {
                name: image.name().to_string(),
                reason: "no image loaded".to_string(),
            })
    }
}
