use std::io::Cursor;

use base64::Engine as _;
use image::ImageReader;

use crate::errors::{GuiPilotError, GuiPilotResult};
use crate::perception::types::ScreenshotMeta;

/// Unprocessed capture of the target machine's screen.
#[derive(Debug, Clone)]
pub struct RawCapture {
    /// Encoded image bytes, PNG unless the machine sends another format.
    pub image_bytes: Vec<u8>,
    pub meta: ScreenshotMeta,
}

impl RawCapture {
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.image_bytes)
    }
}

/// Width and height of an encoded screenshot, read from its header without decoding pixels.
pub fn image_dimensions(bytes: &[u8]) -> GuiPilotResult<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()
        .map_err(|e| GuiPilotError::Perception(format!("screenshot header: {e}")))
}

/// Captures the primary monitor of the local desktop as PNG.
#[cfg(feature = "desktop")]
pub async fn capture_primary() -> GuiPilotResult<RawCapture> {
    tokio::task::spawn_blocking(|| {
        let monitors = xcap::Monitor::all().map_err(|e| GuiPilotError::Machine(format!("list monitors: {e}")))?;
        let monitor = monitors
            .into_iter()
            .find(|m| m.is_primary())
            .ok_or_else(|| GuiPilotError::Machine("no primary monitor".into()))?;
        let scale_factor = f64::from(monitor.scale_factor());
        let image = monitor
            .capture_image()
            .map_err(|e| GuiPilotError::Machine(format!("capture: {e}")))?;

        let (width, height) = (image.width(), image.height());
        let mut png = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut png, image::ImageFormat::Png)
            .map_err(|e| GuiPilotError::Machine(format!("encode png: {e}")))?;
        tracing::debug!(width, height, scale_factor, "desktop captured");

        Ok(RawCapture {
            image_bytes: png.into_inner(),
            meta: ScreenshotMeta {
                physical_width: width,
                physical_height: height,
                scale_factor,
            },
        })
    })
    .await
    .map_err(|e| GuiPilotError::Machine(format!("join: {e}")))?
}
