//! DCT perceptual hash.
//!
//! The reference tables were produced offline by the Python
//! `imagehash.phash` (hash size 8, high-frequency factor 4) on top of Pillow.
//! Matching only works if this module produces the same bits for the same
//! image, so the grayscale conversion and the Lanczos resampler below follow
//! Pillow's fixed-point arithmetic rather than the `image` crate's float
//! implementations.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use image::{DynamicImage, GrayImage, Luma};
use thiserror::Error;

/// Side of the low-frequency DCT block; the hash has `HASH_SIZE²` bits.
pub const HASH_SIZE: usize = 8;
const HIGHFREQ_FACTOR: usize = 4;
/// Side of the grayscale thumbnail the DCT runs on.
const IMG_SIZE: usize = HASH_SIZE * HIGHFREQ_FACTOR;

/// Fixed-point precision of Pillow's 8-bit resampler.
const PRECISION_BITS: u32 = 32 - 8 - 2;
const LANCZOS_SUPPORT: f64 = 3.0;

#[derive(Debug, Error, PartialEq)]
pub enum HashParseError {
    #[error("hash is empty")]
    Empty,

    #[error("invalid hex hash: {0}")]
    Hex(#[from] hex::FromHexError),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot compare a {left}-bit hash with a {right}-bit hash")]
pub struct LengthMismatch {
    pub left: usize,
    pub right: usize,
}

/// Perceptual hash bits, most significant bit first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PerceptualHash {
    bytes: Vec<u8>,
}

impl PerceptualHash {
    /// Pack row-major bits; `bits.len()` is rounded up to whole bytes with
    /// trailing zero bits.
    pub fn from_bits(bits: &[bool]) -> Self {
        let bytes = bits
            .chunks(8)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |acc, (i, &bit)| acc | ((bit as u8) << (7 - i)))
            })
            .collect();
        Self { bytes }
    }

    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8
    }

    /// Number of differing bits.
    pub fn distance(&self, other: &PerceptualHash) -> Result<u32, LengthMismatch> {
        if self.bytes.len() != other.bytes.len() {
            return Err(LengthMismatch {
                left: self.bit_len(),
                right: other.bit_len(),
            });
        }
        Ok(self
            .bytes
            .iter()
            .zip(&other.bytes)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum())
    }
}

impl FromStr for PerceptualHash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(HashParseError::Empty);
        }
        Ok(Self {
            bytes: hex::decode(s)?,
        })
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.bytes))
    }
}

/// Compute the 64-bit perceptual hash of an image.
pub fn phash(image: &DynamicImage) -> PerceptualHash {
    let gray = to_luma(image);
    let thumb = resize_lanczos(&gray, IMG_SIZE as u32, IMG_SIZE as u32);

    let coeffs = low_frequency_dct(&thumb);
    let median = median(&coeffs);

    let bits: Vec<bool> = coeffs.iter().map(|&c| c > median).collect();
    PerceptualHash::from_bits(&bits)
}

/// ITU-R 601-2 luma in 16.16 fixed point, alpha ignored.
fn luma_601(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

fn to_luma(image: &DynamicImage) -> GrayImage {
    match image {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => {
            image.to_luma8()
        }
        _ => {
            let rgb = image.to_rgb8();
            GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let [r, g, b] = rgb.get_pixel(x, y).0;
                Luma([luma_601(r, g, b)])
            })
        }
    }
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let x = x * PI;
        x.sin() / x
    }
}

fn lanczos(x: f64) -> f64 {
    if (-LANCZOS_SUPPORT..LANCZOS_SUPPORT).contains(&x) {
        sinc(x) * sinc(x / LANCZOS_SUPPORT)
    } else {
        0.0
    }
}

/// Per-output-pixel filter taps along one axis.
struct Taps {
    /// `(first input index, tap count)` per output pixel.
    bounds: Vec<(usize, usize)>,
    /// `ksize` fixed-point weights per output pixel.
    weights: Vec<i32>,
    ksize: usize,
}

impl Taps {
    fn new(in_size: usize, out_size: usize) -> Self {
        let scale = in_size as f64 / out_size as f64;
        let filter_scale = scale.max(1.0);
        let support = LANCZOS_SUPPORT * filter_scale;
        let ksize = support.ceil() as usize * 2 + 1;

        let mut bounds = Vec::with_capacity(out_size);
        let mut weights = vec![0i32; out_size * ksize];
        let mut row = Vec::with_capacity(ksize);

        for xx in 0..out_size {
            let center = (xx as f64 + 0.5) * scale;
            let ss = 1.0 / filter_scale;
            // Float-to-int casts truncate toward zero before clamping.
            let xmin = ((center - support + 0.5) as i64).max(0) as usize;
            let xmax = ((center + support + 0.5) as i64).min(in_size as i64) as usize - xmin;

            row.clear();
            let mut total = 0.0;
            for x in 0..xmax {
                let w = lanczos((x as f64 + xmin as f64 - center + 0.5) * ss);
                row.push(w);
                total += w;
            }

            let out = &mut weights[xx * ksize..xx * ksize + xmax];
            for (slot, &w) in out.iter_mut().zip(&row) {
                let w = if total != 0.0 { w / total } else { w };
                let scaled = w * (1u32 << PRECISION_BITS) as f64;
                *slot = if w < 0.0 { (scaled - 0.5) as i32 } else { (scaled + 0.5) as i32 };
            }
            bounds.push((xmin, xmax));
        }

        Self { bounds, weights, ksize }
    }

    fn apply<F>(&self, out: usize, sample: F) -> u8
    where
        F: Fn(usize) -> u8,
    {
        let (start, count) = self.bounds[out];
        let weights = &self.weights[out * self.ksize..out * self.ksize + count];
        let acc = weights
            .iter()
            .enumerate()
            .fold(1i64 << (PRECISION_BITS - 1), |acc, (i, &w)| {
                acc + sample(start + i) as i64 * w as i64
            });
        clip8(acc)
    }
}

fn clip8(v: i64) -> u8 {
    if v >= (1i64 << PRECISION_BITS << 8) {
        255
    } else if v <= 0 {
        0
    } else {
        (v >> PRECISION_BITS) as u8
    }
}

/// Separable Lanczos-3 resample: horizontal pass, then vertical, each rounded
/// back to 8 bits.
fn resize_lanczos(src: &GrayImage, width: u32, height: u32) -> GrayImage {
    let horizontal = if src.width() == width {
        src.clone()
    } else {
        let taps = Taps::new(src.width() as usize, width as usize);
        GrayImage::from_fn(width, src.height(), |x, y| {
            Luma([taps.apply(x as usize, |sx| src.get_pixel(sx as u32, y).0[0])])
        })
    };

    if horizontal.height() == height {
        return horizontal;
    }
    let taps = Taps::new(horizontal.height() as usize, height as usize);
    GrayImage::from_fn(width, height, |x, y| {
        Luma([taps.apply(y as usize, |sy| horizontal.get_pixel(x, sy as u32).0[0])])
    })
}

/// Top-left `HASH_SIZE x HASH_SIZE` block of the unnormalized 2-D DCT-II,
/// row-major. Columns are transformed first, then rows.
fn low_frequency_dct(thumb: &GrayImage) -> Vec<f64> {
    let n = IMG_SIZE;
    let cos: Vec<f64> = (0..HASH_SIZE)
        .flat_map(|k| (0..n).map(move |i| (PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64).cos()))
        .collect();
    let pixel = |row: usize, col: usize| thumb.get_pixel(col as u32, row as u32).0[0] as f64;

    // Column pass: only the first HASH_SIZE frequencies are needed.
    let mut columns = vec![0.0; HASH_SIZE * n];
    for k in 0..HASH_SIZE {
        for col in 0..n {
            let sum: f64 = (0..n).map(|row| pixel(row, col) * cos[k * n + row]).sum();
            columns[k * n + col] = 2.0 * sum;
        }
    }

    let mut out = Vec::with_capacity(HASH_SIZE * HASH_SIZE);
    for k in 0..HASH_SIZE {
        for l in 0..HASH_SIZE {
            let sum: f64 = (0..n).map(|col| columns[k * n + col] * cos[l * n + col]).sum();
            out.push(2.0 * sum);
        }
    }
    out
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
