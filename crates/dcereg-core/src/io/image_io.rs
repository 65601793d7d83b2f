use std::path::{Path, PathBuf};

use image::{GrayImage, ImageFormat, Luma};
use ndarray::Array2;

use crate::error::{RegistrationError, Result};

/// File extensions read as series frames.
const FRAME_EXTENSIONS: [&str; 4] = ["tif", "tiff", "png", "pgm"];

/// Save a slice as 16-bit grayscale TIFF. Intensities are stored as-is,
/// clamped to the 16-bit range.
pub fn save_tiff(slice: &Array2<f32>, path: &Path) -> Result<()> {
    let (h, w) = slice.dim();
    let pixels: Vec<u16> = slice
        .iter()
        .map(|&v| v.round().clamp(0.0, 65535.0) as u16)
        .collect();

    let img = image::ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .ok_or(RegistrationError::DimensionMismatch {
            expected: format!("{w}x{h} pixels"),
            actual: "short pixel buffer".into(),
        })?;
    img.save_with_format(path, ImageFormat::Tiff)?;
    Ok(())
}

/// Save a slice as 8-bit grayscale PNG, stretched to its own min/max.
pub fn save_png(slice: &Array2<f32>, path: &Path) -> Result<()> {
    let (h, w) = slice.dim();
    let (lo, hi) = slice
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = if hi > lo { hi - lo } else { 1.0 };

    let mut img = GrayImage::new(w as u32, h as u32);
    for ((row, col), &v) in slice.indexed_iter() {
        let val = (((v - lo) / range).clamp(0.0, 1.0) * 255.0) as u8;
        img.put_pixel(col as u32, row as u32, Luma([val]));
    }

    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Save a slice, choosing format from file extension.
pub fn save_image(slice: &Array2<f32>, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => save_png(slice, path),
        _ => save_tiff(slice, path),
    }
}

/// Load a grayscale image file as raw 16-bit intensities.
pub fn load_image(path: &Path) -> Result<Array2<f32>> {
    let gray = image::open(path)?.to_luma16();
    let (w, h) = gray.dimensions();
    let mut data = Array2::<f32>::zeros((h as usize, w as usize));
    for (col, row, pixel) in gray.enumerate_pixels() {
        data[[row as usize, col as usize]] = pixel.0[0] as f32;
    }
    Ok(data)
}

/// Frame files in `dir`, sorted by file name.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(RegistrationError::EmptySeries);
    }
    Ok(paths)
}

/// Load every frame of a directory, in file name order.
pub fn load_frames(dir: &Path) -> Result<Vec<Array2<f32>>> {
    list_frames(dir)?.iter().map(|p| load_image(p)).collect()
}
