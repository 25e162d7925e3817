use std::sync::OnceLock;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unrecognized image format")]
    UnknownFormat,

    #[error("HEIC images are not supported by this build")]
    HeicUnsupported,

    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),

    #[cfg(feature = "heic")]
    #[error("failed to decode HEIC image: {0}")]
    Heic(#[from] libheif_rs::HeifError),

    #[cfg(feature = "heic")]
    #[error("HEIC image has an unexpected pixel layout")]
    HeicLayout,
}

/// Container format detected from the leading bytes of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Raster(ImageFormat),
    Heic,
}

/// Colour model declared by the file, before the decoder expands palettes
/// or keeps extra precision. Only [`ColorModel::Rgb`] uploads are cropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorModel {
    /// Three-channel colour without alpha, at any bit depth.
    Rgb,
    /// Palette images (indexed PNG, GIF, low-depth BMP).
    Indexed,
    Other,
}

/// A decoded upload. When `model` is [`ColorModel::Rgb`] the image is always
/// 8-bit `ImageRgb8`.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub image: DynamicImage,
    pub model: ColorModel,
}

/// ISO-BMFF brands that identify an HEIF/HEIC still image.
const HEIF_BRANDS: [&[u8; 4]; 8] = [
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
];

/// The set of decoders available to this process.
#[derive(Debug)]
pub struct FormatRegistry {
    heic: bool,
}

static REGISTRY: OnceLock<FormatRegistry> = OnceLock::new();

/// Register the image decoders once for the whole process.
/// Later calls return the same registry.
pub fn register_formats() -> &'static FormatRegistry {
    REGISTRY.get_or_init(|| {
        let registry = FormatRegistry {
            heic: cfg!(feature = "heic"),
        };
        tracing::info!(heic = registry.heic, "image decoders registered");
        registry
    })
}

impl FormatRegistry {
    pub fn supports_heic(&self) -> bool {
        self.heic
    }

    /// Identify the format from the content. Content type and file name of
    /// the upload are never consulted.
    pub fn sniff(&self, bytes: &[u8]) -> Result<SourceFormat, DecodeError> {
        if is_heif(bytes) {
            return Ok(SourceFormat::Heic);
        }
        image::guess_format(bytes)
            .map(SourceFormat::Raster)
            .map_err(|_| DecodeError::UnknownFormat)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Decoded, DecodeError> {
        let (image, model) = match self.sniff(bytes)? {
            SourceFormat::Raster(format) => {
                let image = image::load_from_memory_with_format(bytes, format)?;
                let model = raster_color_model(format, bytes, &image);
                (image, model)
            }
            SourceFormat::Heic if self.heic => {
                let image = decode_heic(bytes)?;
                let model = if matches!(image, DynamicImage::ImageRgb8(_)) {
                    ColorModel::Rgb
                } else {
                    ColorModel::Other
                };
                (image, model)
            }
            SourceFormat::Heic => return Err(DecodeError::HeicUnsupported),
        };

        let image = match model {
            ColorModel::Rgb => DynamicImage::ImageRgb8(narrow_to_rgb8(image)),
            _ => image,
        };
        Ok(Decoded { image, model })
    }
}

/// The `image` crate expands palettes to RGB(A) and keeps 16-bit samples, so
/// the declared model is read from the file header where the two disagree.
fn raster_color_model(format: ImageFormat, bytes: &[u8], image: &DynamicImage) -> ColorModel {
    match format {
        ImageFormat::Png => png_color_model(bytes),
        ImageFormat::Gif => ColorModel::Indexed,
        ImageFormat::Bmp if bmp_bit_count(bytes).is_some_and(|bits| bits <= 8) => ColorModel::Indexed,
        _ => match image {
            DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgb16(_) => ColorModel::Rgb,
            _ => ColorModel::Other,
        },
    }
}

/// Colour type byte of the IHDR chunk, which always comes first.
fn png_color_model(bytes: &[u8]) -> ColorModel {
    if bytes.get(12..16) != Some(b"IHDR".as_slice()) {
        return ColorModel::Other;
    }
    match bytes.get(25) {
        Some(2) => ColorModel::Rgb,
        Some(3) => ColorModel::Indexed,
        _ => ColorModel::Other,
    }
}

fn bmp_bit_count(bytes: &[u8]) -> Option<u16> {
    let raw = bytes.get(28..30)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

/// 8-bit RGB view of an RGB upload. 16-bit samples keep their high byte and
/// any alpha added by a transparency chunk is dropped.
fn narrow_to_rgb8(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        DynamicImage::ImageRgb16(rgb) => RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            let [r, g, b] = rgb.get_pixel(x, y).0;
            Rgb([(r >> 8) as u8, (g >> 8) as u8, (b >> 8) as u8])
        }),
        DynamicImage::ImageRgba16(rgba) => RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            let [r, g, b, _] = rgba.get_pixel(x, y).0;
            Rgb([(r >> 8) as u8, (g >> 8) as u8, (b >> 8) as u8])
        }),
        other => other.to_rgb8(),
    }
}

fn is_heif(bytes: &[u8]) -> bool {
    if bytes.len() < 12 || &bytes[4..8] != b"ftyp" {
        return false;
    }

    let box_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let box_end = box_len.min(bytes.len());

    let major = &bytes[8..12];
    // Compatible brands start after the 4-byte minor version.
    let compatible = bytes.get(16..box_end).unwrap_or_default();

    std::iter::once(major)
        .chain(compatible.chunks_exact(4))
        .any(|brand| HEIF_BRANDS.iter().any(|b| b.as_slice() == brand))
}

#[cfg(feature = "heic")]
fn decode_heic(bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
    use image::RgbaImage;
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let lib = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(bytes)?;
    let handle = ctx.primary_image_handle()?;

    let has_alpha = handle.has_alpha_channel();
    let chroma = if has_alpha { RgbChroma::Rgba } else { RgbChroma::Rgb };
    let decoded = lib.decode(&handle, ColorSpace::Rgb(chroma), None)?;

    let planes = decoded.planes();
    let plane = planes.interleaved.ok_or(DecodeError::HeicLayout)?;
    let channels = if has_alpha { 4 } else { 3 };
    let row_len = plane.width as usize * channels;

    let mut pixels = Vec::with_capacity(row_len * plane.height as usize);
    for row in plane.data.chunks(plane.stride).take(plane.height as usize) {
        let row = row.get(..row_len).ok_or(DecodeError::HeicLayout)?;
        pixels.extend_from_slice(row);
    }

    let image = if has_alpha {
        RgbaImage::from_raw(plane.width, plane.height, pixels).map(DynamicImage::ImageRgba8)
    } else {
        RgbImage::from_raw(plane.width, plane.height, pixels).map(DynamicImage::ImageRgb8)
    };
    image.ok_or(DecodeError::HeicLayout)
}

#[cfg(not(feature = "heic"))]
fn decode_heic(_bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
    Err(DecodeError::HeicUnsupported)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn png_bytes(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn ftyp(major: &[u8; 4], compatible: &[&[u8; 4]]) -> Vec<u8> {
        let len = 16 + 4 * compatible.len();
        let mut out = (len as u32).to_be_bytes().to_vec();
        out.extend_from_slice(b"ftyp");
        out.extend_from_slice(major);
        out.extend_from_slice(&[0, 0, 0, 0]);
        for brand in compatible {
            out.extend_from_slice(*brand);
        }
        out.extend_from_slice(&[0u8; 16]);
        out
    }

    #[test]
    fn test_register_formats_is_idempotent() {
        let first = register_formats();
        let second = register_formats();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.supports_heic(), cfg!(feature = "heic"));
    }

    #[test]
    fn test_sniff_heic_major_brand() {
        let bytes = ftyp(b"heic", &[b"mif1"]);
        assert_eq!(register_formats().sniff(&bytes).unwrap(), SourceFormat::Heic);
    }

    #[test]
    fn test_sniff_heic_compatible_brand() {
        let bytes = ftyp(b"abcd", &[b"isom", b"mif1"]);
        assert_eq!(register_formats().sniff(&bytes).unwrap(), SourceFormat::Heic);
    }

    #[test]
    fn test_sniff_ignores_other_iso_bmff() {
        let bytes = ftyp(b"isom", &[b"mp41"]);
        assert!(!is_heif(&bytes));
    }

    #[test]
    fn test_decode_png() {
        let img = RgbImage::from_pixel(5, 3, Rgb([10, 20, 30]));
        let decoded = register_formats().decode(&png_bytes(&img)).unwrap();
        assert_eq!(decoded.model, ColorModel::Rgb);
        assert_eq!((decoded.image.width(), decoded.image.height()), (5, 3));
        assert!(matches!(decoded.image, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn test_palette_png_is_indexed() {
        let decoded = register_formats()
            .decode(include_bytes!("testdata/padded_palette.png"))
            .unwrap();
        assert_eq!(decoded.model, ColorModel::Indexed);
        assert_eq!(decoded.image.to_rgb8().get_pixel(0, 0), &Rgb([12, 34, 56]));
    }

    #[test]
    fn test_rgb16_png_is_narrowed_by_high_byte() {
        let decoded = register_formats()
            .decode(include_bytes!("testdata/padded_rgb16.png"))
            .unwrap();
        assert_eq!(decoded.model, ColorModel::Rgb);
        let DynamicImage::ImageRgb8(rgb) = &decoded.image else {
            panic!("expected 8-bit RGB, got {:?}", decoded.image.color());
        };
        // 0x12FF would round to 0x13; truncation keeps 0x12.
        assert_eq!(rgb.get_pixel(5, 7), &Rgb([0x12, 0x80, 0xFE]));
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([0x0C, 0x22, 0x38]));
    }

    #[test]
    fn test_rgba_png_is_other() {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([1, 2, 3, 255]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();

        let decoded = register_formats().decode(&buf.into_inner()).unwrap();
        assert_eq!(decoded.model, ColorModel::Other);
        assert!(matches!(decoded.image, DynamicImage::ImageRgba8(_)));
    }

    #[test]
    fn test_decode_garbage_is_unknown_format() {
        let err = register_formats().decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, DecodeError::UnknownFormat));
    }

    #[cfg(feature = "heic")]
    #[test]
    fn test_decode_heic() {
        // 64x48, left half (200, 40, 40), right half (40, 60, 200), lossy HEVC.
        let bytes = include_bytes!("testdata/split.heic");
        let formats = register_formats();
        assert_eq!(formats.sniff(bytes).unwrap(), SourceFormat::Heic);

        let decoded = formats.decode(bytes).unwrap();
        assert_eq!(decoded.model, ColorModel::Rgb);
        let DynamicImage::ImageRgb8(rgb) = &decoded.image else {
            panic!("expected 8-bit RGB, got {:?}", decoded.image.color());
        };
        assert_eq!(rgb.dimensions(), (64, 48));

        let close = |actual: &Rgb<u8>, expected: [u8; 3]| {
            actual.0.iter().zip(expected).all(|(&a, e)| a.abs_diff(e) <= 12)
        };
        assert!(close(rgb.get_pixel(5, 5), [200, 40, 40]), "{:?}", rgb.get_pixel(5, 5));
        assert!(close(rgb.get_pixel(58, 40), [40, 60, 200]), "{:?}", rgb.get_pixel(58, 40));
    }

    #[cfg(not(feature = "heic"))]
    #[test]
    fn test_heic_without_feature_is_rejected() {
        let bytes = ftyp(b"heic", &[]);
        let err = register_formats().decode(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::HeicUnsupported));
    }
}
