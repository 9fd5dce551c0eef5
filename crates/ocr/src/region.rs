use image::{DynamicImage, GenericImageView, ImageFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("Unrecognized image format")]
    UnknownFormat,
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// A crop rectangle in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for CropRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

impl std::str::FromStr for CropRect {
    type Err = String;

    /// Parses `x,y,width,height`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<u32> = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("Invalid crop '{s}': {e}"))?;
        match parts.as_slice() {
            [x, y, w, h] => Ok(CropRect::new(*x, *y, *w, *h)),
            _ => Err(format!("Invalid crop '{s}': expected x,y,width,height")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRegion {
    #[error("Crop {0} has zero area")]
    Empty(CropRect),
    #[error("Crop {rect} exceeds image bounds {width}x{height}")]
    OutOfBounds { rect: CropRect, width: u32, height: u32 },
}

/// A decoded source image and the container format it arrived in.
#[derive(Debug, Clone)]
pub struct RawImage {
    format: ImageFormat,
    image: DynamicImage,
}

impl RawImage {
    pub fn decode(bytes: &[u8]) -> Result<Self, AcquireError> {
        let format = image::guess_format(bytes).map_err(|_| AcquireError::UnknownFormat)?;
        let image = image::load_from_memory_with_format(bytes, format)?;
        Ok(Self { format, image })
    }

    pub fn from_image(image: DynamicImage, format: ImageFormat) -> Self {
        Self { format, image }
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// The part of a [`RawImage`] carried forward into normalization.
///
/// Always non-empty and fully contained in its source.
#[derive(Debug, Clone)]
pub struct CroppedRegion {
    rect: CropRect,
    image: DynamicImage,
}

impl CroppedRegion {
    /// Restrict `raw` to `rect`, or take the whole image when `rect` is `None`.
    pub fn new(raw: &RawImage, rect: Option<CropRect>) -> Result<Self, InvalidRegion> {
        let (width, height) = raw.dimensions();
        let rect = rect.unwrap_or(CropRect::new(0, 0, width, height));

        if rect.is_empty() {
            return Err(InvalidRegion::Empty(rect));
        }
        let fits = |origin: u32, extent: u32, limit: u32| {
            origin.checked_add(extent).is_some_and(|end| end <= limit)
        };
        if !fits(rect.x, rect.width, width) || !fits(rect.y, rect.height, height) {
            return Err(InvalidRegion::OutOfBounds { rect, width, height });
        }

        let image = raw.image.crop_imm(rect.x, rect.y, rect.width, rect.height);
        Ok(Self { rect, image })
    }

    pub fn rect(&self) -> CropRect {
        self.rect
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}
