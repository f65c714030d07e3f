//! QR challenge rendering.
//!
//! Frontends poll `/qr/:user_id` and drop the returned value straight into
//! an `<img src=...>`, so the challenge payload is rendered to a PNG data
//! URL here rather than shipped raw.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageBuffer, Luma};
use qrcode::{Color, QrCode};

use crate::error::GatewayError;

/// Pixels per QR module.
const MODULE_SCALE: u32 = 4;
/// Quiet-zone width, in modules, around the code.
const QUIET_ZONE: u32 = 4;

/// Render a challenge payload as a `data:image/png;base64,...` URL.
pub fn to_data_url(payload: &str) -> Result<String, GatewayError> {
    let code = QrCode::new(payload.as_bytes())
        .map_err(|err| GatewayError::Internal(format!("QR encode failed: {err}")))?;
    let width = code.width();
    let colors = code.to_colors();

    let side = (width as u32 + 2 * QUIET_ZONE) * MODULE_SCALE;
    let img: ImageBuffer<Luma<u8>, Vec<u8>> = ImageBuffer::from_fn(side, side, |x, y| {
        let mx = (x / MODULE_SCALE) as i64 - QUIET_ZONE as i64;
        let my = (y / MODULE_SCALE) as i64 - QUIET_ZONE as i64;
        let dark = mx >= 0
            && my >= 0
            && (mx as usize) < width
            && (my as usize) < width
            && colors[my as usize * width + mx as usize] == Color::Dark;
        if dark {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|err| GatewayError::Internal(format!("QR render failed: {err}")))?;

    Ok(format!("data:image/png;base64,{}", BASE64.encode(&png)))
}
