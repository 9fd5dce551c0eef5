use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use std::io::Cursor;
use thiserror::Error;

use crate::region::{CropRect, CroppedRegion, InvalidRegion};

/// Pixel value for ink (luminance below the threshold).
pub const INK: u8 = 0;
/// Pixel value for paper (everything else).
pub const PAPER: u8 = 255;

const MAX_SMOOTHING_PASSES: usize = 10_000;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error(transparent)]
    InvalidRegion(#[from] InvalidRegion),
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

/// A two-tone rendering of a cropped region, ready for extraction.
#[derive(Debug, Clone)]
pub struct BinarizedImage {
    threshold: u8,
    image: GrayImage,
}

impl BinarizedImage {
    /// Luminance cut used: values below it became [`INK`].
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.image
    }

    /// Lossless PNG encoding, the format handed to extractors.
    pub fn to_png(&self) -> Result<Vec<u8>, PreprocessError> {
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(self.image.clone())
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| PreprocessError::Encode(e.to_string()))?;
        Ok(buf)
    }
}

/// Grayscale + adaptive threshold.
pub fn normalize(region: &CroppedRegion) -> Result<BinarizedImage, PreprocessError> {
    let gray: GrayImage = region.image().to_luma8();
    if gray.width() == 0 || gray.height() == 0 {
        let (width, height) = gray.dimensions();
        return Err(InvalidRegion::Empty(CropRect { width, height, ..region.rect() }).into());
    }

    let threshold = compute_threshold(&gray);
    tracing::debug!(threshold, width = gray.width(), height = gray.height(), "binarizing region");

    let image: GrayImage = ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let v = if gray.get_pixel(x, y)[0] < threshold { INK } else { PAPER };
        Luma([v])
    });

    Ok(BinarizedImage { threshold, image })
}

/// Threshold for `gray`, derived from its own luminance histogram.
///
/// Intermodes first, Otsu when the histogram never settles into two modes.
/// The result always lies in `(min, max]`, and strictly inside `(min, max)`
/// whenever the spread is at least two levels. A uniform image yields its own
/// luminance, which leaves every pixel as paper.
pub fn compute_threshold(gray: &GrayImage) -> u8 {
    let (min, max) = gray
        .pixels()
        .fold((255u8, 0u8), |(mn, mx), p| (mn.min(p[0]), mx.max(p[0])));
    if max <= min {
        return min;
    }

    let hist = luminance_histogram(gray);
    let raw = intermodes_threshold(&hist).unwrap_or_else(|| otsu_threshold(&hist));

    let lo = min + 1;
    let hi = if max - min >= 2 { max - 1 } else { max };
    raw.clamp(lo, hi)
}

pub fn luminance_histogram(gray: &GrayImage) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for p in gray.pixels() {
        hist[p[0] as usize] += 1;
    }
    hist
}

/// Smooth the histogram with a 3-point running mean until exactly two local
/// maxima remain, then cut halfway between them. `None` if that never happens.
pub fn intermodes_threshold(hist: &[u64; 256]) -> Option<u8> {
    let mut h: Vec<f64> = hist.iter().map(|&c| c as f64).collect();
    let mut passes = 0;
    while local_maxima(&h).count() != 2 {
        if passes == MAX_SMOOTHING_PASSES {
            return None;
        }
        smooth(&mut h);
        passes += 1;
    }
    let peaks: usize = local_maxima(&h).sum();
    tracing::trace!(passes, peaks, "intermodes converged");
    u8::try_from(peaks / 2).ok()
}

fn local_maxima(h: &[f64]) -> impl Iterator<Item = usize> + '_ {
    (1..h.len() - 1).filter(move |&i| h[i - 1] < h[i] && h[i + 1] < h[i])
}

fn smooth(h: &mut [f64]) {
    let n = h.len();
    let (mut previous, mut current, mut next) = (0.0, 0.0, h[0]);
    for i in 0..n - 1 {
        previous = current;
        current = next;
        next = h[i + 1];
        h[i] = (previous + current + next) / 3.0;
    }
    h[n - 1] = (current + next) / 3.0;
}

/// Cut maximising between-class variance, expressed as "below this is ink".
fn otsu_threshold(hist: &[u64; 256]) -> u8 {
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 128;
    }
    let sum_total: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut sum_background = 0.0;
    let mut weight_background = 0u64;
    let mut best_variance = 0.0;
    let mut best = 0usize;

    for (t, &count) in hist.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total - weight_background;
        if weight_foreground == 0 {
            break;
        }
        sum_background += t as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_total - sum_background) / weight_foreground as f64;
        let variance = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);
        if variance > best_variance {
            best_variance = variance;
            best = t;
        }
    }

    // Otsu puts `best` itself in the dark class.
    u8::try_from(best + 1).unwrap_or(u8::MAX)
}
