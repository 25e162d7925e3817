use image::{DynamicImage, RgbImage};
use serde::Serialize;

use crate::decode::{ColorModel, Decoded};

/// Region of an image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A decoded screenshot after padding removal.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub image: DynamicImage,
    /// `None` when the image was used as decoded.
    pub crop: Option<CropBox>,
}

/// Bounding box of every pixel whose colour differs from the pixel at (0, 0).
/// Returns `None` for an empty image or one that is entirely background.
pub fn content_bounds(rgb: &RgbImage) -> Option<CropBox> {
    let background = *rgb.get_pixel_checked(0, 0)?;

    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in rgb.enumerate_pixels() {
        if *pixel == background {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    bounds.map(|(x0, y0, x1, y1)| CropBox {
        x: x0,
        y: y0,
        width: x1 - x0 + 1,
        height: y1 - y0 + 1,
    })
}

/// Strip uniform padding that matches the top-left pixel.
///
/// Only uploads declared as RGB are cropped: the background is modelled as an
/// RGB canvas, and palette, grayscale and alpha images are passed through
/// untouched.
pub fn normalize(decoded: Decoded) -> Normalized {
    let Decoded { image, model } = decoded;
    let crop = match (&image, model) {
        (DynamicImage::ImageRgb8(rgb), ColorModel::Rgb) => content_bounds(rgb),
        _ => {
            tracing::debug!(?model, color = ?image.color(), "colour mode differs from background, not cropping");
            None
        }
    };

    match crop {
        Some(b) => {
            tracing::debug!(
                "cropped {}x{} to {}x{} at ({}, {})",
                image.width(),
                image.height(),
                b.width,
                b.height,
                b.x,
                b.y
            );
            Normalized {
                image: image.crop_imm(b.x, b.y, b.width, b.height),
                crop,
            }
        }
        None => Normalized { image, crop: None },
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, Rgba, RgbaImage};

    use super::*;
    use crate::decode::register_formats;

    const BG: Rgb<u8> = Rgb([12, 34, 56]);

    fn rgb(img: RgbImage) -> Decoded {
        Decoded {
            image: DynamicImage::ImageRgb8(img),
            model: ColorModel::Rgb,
        }
    }

    fn padded(width: u32, height: u32, content: (u32, u32, u32, u32)) -> RgbImage {
        let (cx, cy, cw, ch) = content;
        RgbImage::from_fn(width, height, |x, y| {
            if x >= cx && x < cx + cw && y >= cy && y < cy + ch {
                Rgb([200, (x * 7 % 256) as u8, (y * 11 % 256) as u8])
            } else {
                BG
            }
        })
    }

    #[test]
    fn test_content_bounds_finds_inner_region() {
        let img = padded(40, 30, (5, 7, 20, 10));
        assert_eq!(
            content_bounds(&img),
            Some(CropBox { x: 5, y: 7, width: 20, height: 10 })
        );
    }

    #[test]
    fn test_content_bounds_single_pixel() {
        let mut img = RgbImage::from_pixel(10, 10, BG);
        img.put_pixel(9, 0, Rgb([0, 0, 0]));
        assert_eq!(
            content_bounds(&img),
            Some(CropBox { x: 9, y: 0, width: 1, height: 1 })
        );
    }

    #[test]
    fn test_uniform_image_is_not_cropped() {
        let img = RgbImage::from_pixel(8, 8, BG);
        assert_eq!(content_bounds(&img), None);

        let out = normalize(rgb(img));
        assert_eq!(out.crop, None);
        assert_eq!((out.image.width(), out.image.height()), (8, 8));
    }

    #[test]
    fn test_normalize_crops_rgb() {
        let img = padded(64, 48, (10, 4, 30, 20));
        let out = normalize(rgb(img.clone()));

        assert_eq!((out.image.width(), out.image.height()), (30, 20));
        let cropped = out.image.to_rgb8();
        assert_eq!(cropped.get_pixel(0, 0), img.get_pixel(10, 4));
        assert_eq!(cropped.get_pixel(29, 19), img.get_pixel(39, 23));
    }

    #[test]
    fn test_non_matching_border_is_preserved() {
        // Left column differs from the (0,0) colour, so it stays.
        let mut img = padded(20, 20, (5, 5, 5, 5));
        for y in 1..20 {
            img.put_pixel(0, y, Rgb([255, 255, 255]));
        }
        let out = normalize(rgb(img));
        assert_eq!(out.crop, Some(CropBox { x: 0, y: 1, width: 10, height: 19 }));
    }

    #[test]
    fn test_crop_never_grows_the_image() {
        for content in [(0, 0, 16, 16), (3, 0, 1, 16), (15, 15, 1, 1)] {
            let img = padded(16, 16, content);
            if let Some(b) = content_bounds(&img) {
                assert!(b.x + b.width <= 16 && b.y + b.height <= 16);
            }
        }
    }

    #[test]
    fn test_rgba_is_passed_through() {
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        img.put_pixel(5, 5, Rgba([255, 255, 255, 255]));
        let out = normalize(Decoded {
            image: DynamicImage::ImageRgba8(img),
            model: ColorModel::Other,
        });
        assert_eq!(out.crop, None);
        assert_eq!((out.image.width(), out.image.height()), (10, 10));
    }

    #[test]
    fn test_palette_png_is_not_cropped() {
        let decoded = register_formats()
            .decode(include_bytes!("testdata/padded_palette.png"))
            .unwrap();
        let out = normalize(decoded);
        assert_eq!(out.crop, None);
        assert_eq!((out.image.width(), out.image.height()), (40, 30));
    }

    #[test]
    fn test_rgb16_png_is_cropped() {
        let decoded = register_formats()
            .decode(include_bytes!("testdata/padded_rgb16.png"))
            .unwrap();
        let out = normalize(decoded);
        assert_eq!(out.crop, Some(CropBox { x: 5, y: 7, width: 20, height: 10 }));
        assert_eq!((out.image.width(), out.image.height()), (20, 10));
    }
}
