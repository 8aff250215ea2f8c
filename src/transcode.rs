//! Image transcoding for the e-ink panel.
//!
//! Any decodable image becomes a fixed-size, 1-bit, Floyd–Steinberg
//! dithered BMP: grayscale, shrink to fit (never enlarge), center on a white
//! canvas, dither, encode.

use image::imageops::{self, BiLevel, FilterType};
use image::{GrayImage, ImageResult, Luma};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Target panel size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new(800, 480)
    }
}

/// Name of the converted bitmap for an uploaded file: `{stem}.bmp`.
pub fn display_file_name(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());
    format!("{}.bmp", stem)
}

/// Convert encoded image bytes into a 1-bit BMP of exactly `target` size.
pub fn convert(input: &[u8], target: Dimensions) -> ImageResult<Vec<u8>> {
    let gray = image::load_from_memory(input)?.to_luma8();
    let mut canvas = letterbox(&gray, target);
    imageops::dither(&mut canvas, &BiLevel);
    Ok(encode_bmp_1bit(&canvas))
}

/// Read `input_path`, convert it and write the bitmap to `output_path`.
///
/// The bitmap is written to a sibling temporary file and renamed into
/// place, so readers never see a partial file. Any failure is reported as
/// `ConversionFailed`.
pub fn convert_file(input_path: &Path, output_path: &Path, target: Dimensions) -> Result<()> {
    let name = input_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| input_path.to_string_lossy().to_string());

    let input = fs::read(input_path).map_err(|e| Error::conversion(&name, e))?;
    let bitmap = convert(&input, target).map_err(|e| Error::conversion(&name, e))?;

    let parent = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| Error::conversion(&name, e))?;

    // Each writer gets its own temporary file; concurrent conversions of the
    // same photo race only on the final rename.
    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| Error::conversion(&name, e))?;
    tmp.write_all(&bitmap).map_err(|e| Error::conversion(&name, e))?;
    tmp.persist(output_path)
        .map_err(|e| Error::conversion(&name, e.error))?;

    tracing::debug!(
        input = %input_path.display(),
        output = %output_path.display(),
        bytes = bitmap.len(),
        "Converted image"
    );
    Ok(())
}

/// Size of `source` after shrinking it to fit inside `target`, keeping the
/// aspect ratio. Images that already fit keep their size.
fn fitted_size(source: (u32, u32), target: Dimensions) -> (u32, u32) {
    let (sw, sh) = source;
    let scale = (target.width as f64 / sw as f64)
        .min(target.height as f64 / sh as f64)
        .min(1.0);

    let w = ((sw as f64 * scale).round() as u32).clamp(1, target.width);
    let h = ((sh as f64 * scale).round() as u32).clamp(1, target.height);
    (w, h)
}

/// Resize to fit and paste centered on a white canvas of the target size.
fn letterbox(gray: &GrayImage, target: Dimensions) -> GrayImage {
    let (w, h) = fitted_size(gray.dimensions(), target);

    let mut canvas = GrayImage::from_pixel(target.width, target.height, Luma([255]));
    let x = (target.width - w) / 2;
    let y = (target.height - h) / 2;

    if (w, h) == gray.dimensions() {
        imageops::replace(&mut canvas, gray, x as i64, y as i64);
    } else {
        let resized = imageops::resize(gray, w, h, FilterType::Lanczos3);
        imageops::replace(&mut canvas, &resized, x as i64, y as i64);
    }
    canvas
}

const BMP_FILE_HEADER_LEN: u32 = 14;
const BMP_INFO_HEADER_LEN: u32 = 40;
const BMP_PALETTE_LEN: u32 = 2 * 4;
/// 72 DPI
const BMP_PIXELS_PER_METER: i32 = 2835;

/// Encode a black/white image as an uncompressed 1-bit BMP.
///
/// Palette index 0 is black and 1 is white; pixels at or above mid-gray are
/// white. Rows are stored bottom-up and padded to 4 bytes.
fn encode_bmp_1bit(img: &GrayImage) -> Vec<u8> {
    let (width, height) = img.dimensions();
    let row_len = width.div_ceil(32) * 4;
    let pixel_len = row_len * height;
    let data_offset = BMP_FILE_HEADER_LEN + BMP_INFO_HEADER_LEN + BMP_PALETTE_LEN;
    let file_len = data_offset + pixel_len;

    let mut out = Vec::with_capacity(file_len as usize);

    // BITMAPFILEHEADER
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&file_len.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&data_offset.to_le_bytes());

    // BITMAPINFOHEADER
    out.extend_from_slice(&BMP_INFO_HEADER_LEN.to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    out.extend_from_slice(&(height as i32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // planes
    out.extend_from_slice(&1u16.to_le_bytes()); // bits per pixel
    out.extend_from_slice(&0u32.to_le_bytes()); // BI_RGB
    out.extend_from_slice(&pixel_len.to_le_bytes());
    out.extend_from_slice(&BMP_PIXELS_PER_METER.to_le_bytes());
    out.extend_from_slice(&BMP_PIXELS_PER_METER.to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes()); // colors used
    out.extend_from_slice(&2u32.to_le_bytes()); // colors important

    // Palette, BGRA
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(&[255, 255, 255, 0]);

    for y in (0..height).rev() {
        let mut row = vec![0u8; row_len as usize];
        for x in 0..width {
            if img.get_pixel(x, y)[0] >= 128 {
                row[(x / 8) as usize] |= 0x80 >> (x % 8);
            }
        }
        out.extend_from_slice(&row);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    fn bits_per_pixel(bmp: &[u8]) -> u16 {
        u16::from_le_bytes([bmp[28], bmp[29]])
    }

    #[test]
    fn test_display_file_name() {
        assert_eq!(display_file_name("a.jpg"), "a.bmp");
        assert_eq!(display_file_name("holiday.2019.png"), "holiday.2019.bmp");
        assert_eq!(display_file_name("noext"), "noext.bmp");
    }

    #[test]
    fn test_fitted_size_shrinks_wide_and_tall() {
        let target = Dimensions::default();
        assert_eq!(fitted_size((1600, 960), target), (800, 480));
        assert_eq!(fitted_size((4000, 1000), target), (800, 200));
        assert_eq!(fitted_size((960, 1920), target), (240, 480));
    }

    #[test]
    fn test_fitted_size_never_upscales() {
        let target = Dimensions::default();
        assert_eq!(fitted_size((100, 50), target), (100, 50));
        assert_eq!(fitted_size((800, 480), target), (800, 480));
    }

    #[test]
    fn test_fitted_size_keeps_at_least_one_pixel() {
        assert_eq!(fitted_size((10_000, 1), Dimensions::default()), (800, 1));
    }

    #[test]
    fn test_letterbox_centers_on_white() {
        let gray = GrayImage::from_pixel(100, 50, Luma([0]));
        let canvas = letterbox(&gray, Dimensions::default());

        assert_eq!(canvas.dimensions(), (800, 480));
        // Offset is ((800 - 100) / 2, (480 - 50) / 2) = (350, 215)
        assert_eq!(canvas.get_pixel(349, 215)[0], 255);
        assert_eq!(canvas.get_pixel(350, 215)[0], 0);
        assert_eq!(canvas.get_pixel(449, 264)[0], 0);
        assert_eq!(canvas.get_pixel(450, 264)[0], 255);
        assert_eq!(canvas.get_pixel(350, 265)[0], 255);
    }

    #[test]
    fn test_convert_produces_1bit_bmp_of_target_size() {
        let img = RgbImage::from_fn(1200, 900, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let input = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let bmp = convert(&input, Dimensions::default()).unwrap();
        assert_eq!(&bmp[0..2], b"BM");
        assert_eq!(bits_per_pixel(&bmp), 1);
        assert_eq!(bmp.len(), 62 + 100 * 480);

        let decoded = image::load_from_memory_with_format(&bmp, ImageFormat::Bmp).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (800, 480));

        // Only black and white survive dithering
        let luma = decoded.to_luma8();
        assert!(luma.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_convert_mid_gray_dithers_to_mix() {
        let img = GrayImage::from_pixel(800, 480, Luma([128]));
        let input = encode(DynamicImage::ImageLuma8(img), ImageFormat::Png);

        let bmp = convert(&input, Dimensions::default()).unwrap();
        let luma = image::load_from_memory(&bmp).unwrap().to_luma8();
        let white = luma.pixels().filter(|p| p[0] == 255).count();
        let total = (800 * 480) as f64;
        let ratio = white as f64 / total;
        assert!(ratio > 0.4 && ratio < 0.6, "white ratio {}", ratio);
    }

    #[test]
    fn test_convert_custom_dimensions_pad_rows() {
        let img = GrayImage::from_pixel(30, 30, Luma([0]));
        let input = encode(DynamicImage::ImageLuma8(img), ImageFormat::Png);

        // 33 px wide needs 5 bytes per row, padded to 8
        let bmp = convert(&input, Dimensions::new(33, 10)).unwrap();
        assert_eq!(bmp.len(), 62 + 8 * 10);
        let decoded = image::load_from_memory(&bmp).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (33, 10));
    }

    #[test]
    fn test_convert_rejects_corrupt_input() {
        assert!(convert(b"definitely not an image", Dimensions::default()).is_err());
    }

    #[test]
    fn test_convert_file_reports_conversion_failed() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.jpg");
        std::fs::write(&input, b"\xff\xd8\xff garbage").unwrap();
        let output = dir.path().join("display").join("broken.bmp");

        let err = convert_file(&input, &output, Dimensions::default()).unwrap_err();
        assert!(matches!(err, Error::ConversionFailed { ref filename, .. } if filename == "broken.jpg"));
        assert!(!output.exists());
    }

    #[test]
    fn test_convert_file_overwrites_existing_bitmap() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.png");
        DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([0])))
            .save(&input)
            .unwrap();
        let output = dir.path().join("display").join("a.bmp");

        convert_file(&input, &output, Dimensions::default()).unwrap();
        std::fs::write(&output, b"stale").unwrap();
        convert_file(&input, &output, Dimensions::default()).unwrap();

        let bmp = std::fs::read(&output).unwrap();
        assert_eq!(bits_per_pixel(&bmp), 1);
        let leftovers = std::fs::read_dir(output.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_concurrent_conversions_of_same_photo() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.png");
        DynamicImage::ImageLuma8(GrayImage::from_fn(300, 200, |x, y| Luma([(x + y) as u8])))
            .save(&input)
            .unwrap();
        let output = dir.path().join("display").join("a.bmp");

        let results: Vec<_> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| convert_file(&input, &output, Dimensions::default())))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        for result in results {
            assert!(result.is_ok(), "{:?}", result);
        }
        let decoded = image::load_from_memory(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (800, 480));
        assert_eq!(std::fs::read_dir(output.parent().unwrap()).unwrap().count(), 1);
    }
}
