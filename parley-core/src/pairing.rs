//! Renders pairing challenges as QR codes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use qrcode::render::svg;
use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;

use crate::error::ParleyError;

/// SVG QR code wrapped in a `data:` URI, ready for an `<img>` tag.
pub fn render_data_uri(payload: &str) -> Result<String, ParleyError> {
    let code = QrCode::new(payload.as_bytes())?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .quiet_zone(true)
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
}

/// Half-block unicode rendering for scanning straight off a terminal.
pub fn render_terminal(payload: &str) -> Result<String, ParleyError> {
    let code = QrCode::new(payload.as_bytes())?;
    Ok(code
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
