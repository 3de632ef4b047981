//! Image export of surfaces.

use std::path::Path;

use glam::Vec4;
use image::{ImageBuffer, Rgba};

use episcatter_render::Surface;

use crate::{Error, Result};

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Converts a color surface to RGBA8, clamping every channel to `[0, 1]`.
pub fn to_rgba8(surface: &Surface<Vec4>) -> Vec<u8> {
    surface
        .texels()
        .iter()
        .flat_map(|c| [to_unorm8(c.x), to_unorm8(c.y), to_unorm8(c.z), to_unorm8(c.w)])
        .collect()
}

/// Maps a scalar surface from `[lo, hi]` to opaque gray RGBA8.
pub fn scalar_to_rgba8(surface: &Surface<f32>, lo: f32, hi: f32) -> Vec<u8> {
    let range = (hi - lo).max(f32::EPSILON);
    surface
        .texels()
        .iter()
        .flat_map(|v| {
            let g = to_unorm8((v - lo) / range);
            [g, g, g, 255]
        })
        .collect()
}

fn image_buffer(data: Vec<u8>, width: u32, height: u32) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>> {
    ImageBuffer::from_raw(width, height, data).ok_or(Error::InvalidImageData)
}

/// Saves RGBA8 pixel data as PNG or JPEG, picked by the file extension.
pub fn save_rgba8(path: impl AsRef<Path>, data: Vec<u8>, width: u32, height: u32) -> Result<()> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    let img = image_buffer(data, width, height)?;
    match extension.as_str() {
        "png" => img.save_with_format(path, image::ImageFormat::Png)?,
        "jpg" | "jpeg" => {
            let rgb = image::DynamicImage::ImageRgba8(img).to_rgb8();
            rgb.save_with_format(path, image::ImageFormat::Jpeg)?;
        }
        _ => return Err(Error::UnsupportedFormat(extension)),
    }
    log::info!("saved {}x{} image to {}", width, height, path.display());
    Ok(())
}

/// Saves a color surface.
pub fn save_image(path: impl AsRef<Path>, surface: &Surface<Vec4>) -> Result<()> {
    let (width, height) = surface.size();
    save_rgba8(path, to_rgba8(surface), width, height)
}

/// Encodes a color surface as PNG in memory.
pub fn encode_png(surface: &Surface<Vec4>) -> Result<Vec<u8>> {
    let (width, height) = surface.size();
    let img = image_buffer(to_rgba8(surface), width, height)?;
    let mut buffer = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buffer, image::ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba8_clamps() {
        let s = Surface::from_texels("c", 2, 1, vec![Vec4::new(-1.0, 0.5, 2.0, 1.0), Vec4::ONE]).unwrap();
        assert_eq!(to_rgba8(&s), vec![0, 128, 255, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn test_png_signature() {
        let s = Surface::from_fn("c", 4, 3, |x, _| Vec4::new(x as f32 / 3.0, 0.0, 0.0, 1.0)).unwrap();
        let png = encode_png(&s).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn test_unsupported_extension() {
        let s = Surface::<Vec4>::new("c", 1, 1).unwrap();
        let err = save_image(std::env::temp_dir().join("episcatter.bmpx"), &s).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }
}
