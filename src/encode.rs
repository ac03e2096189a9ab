use crate::types::{Bgra, Image};
use crate::{FuseError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};

/// Default JPEG quality for frames sent to the remote detector.
pub const DETECTION_JPEG_QUALITY: u8 = 80;

fn to_rgb(img: &Image<Bgra>) -> Result<RgbImage> {
    let mut data = Vec::with_capacity(img.width() * img.height() * 3);
    for px in img.pixels() {
        data.extend_from_slice(&[px.r, px.g, px.b]);
    }
    ImageBuffer::<Rgb<u8>, _>::from_raw(img.width() as u32, img.height() as u32, data)
        .ok_or_else(|| FuseError::InvalidImage("colour buffer does not match its dimensions".into()))
}

/// Compress a colour frame to JPEG at the given quality (1-100).
pub fn compress_jpeg(img: &Image<Bgra>, quality: u8) -> Result<Vec<u8>> {
    let rgb = to_rgb(img)?;
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    Ok(buf)
}

/// Down-scale a colour frame by `scale` with nearest-neighbour sampling and
/// compress it to JPEG.
pub fn compress_scaled(img: &Image<Bgra>, scale: f64, quality: u8) -> Result<Vec<u8>> {
    if !(scale > 0.0 && scale <= 1.0) {
        return Err(FuseError::Config(format!(
            "detection scale must be in (0, 1], got {}",
            scale
        )));
    }
    let rgb = to_rgb(img)?;
    let width = ((img.width() as f64 * scale) as u32).max(1);
    let height = ((img.height() as f64 * scale) as u32).max(1);
    let small = imageops::resize(&rgb, width, height, FilterType::Nearest);

    let mut buf = Vec::new();
    small.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    Ok(buf)
}
