use crate::error::DecodeError;
use image::{DynamicImage, GrayImage, ImageError, RgbImage};
use std::io::Cursor;
use tracing::instrument;

/// Decoded upload, owned by a single request.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelGrid {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl PixelGrid {
    pub fn width(&self) -> u32 {
        match self {
            PixelGrid::Gray(img) => img.width(),
            PixelGrid::Rgb(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            PixelGrid::Gray(img) => img.height(),
            PixelGrid::Rgb(img) => img.height(),
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            PixelGrid::Gray(_) => 1,
            PixelGrid::Rgb(_) => 3,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

impl From<DynamicImage> for PixelGrid {
    fn from(img: DynamicImage) -> Self {
        match img {
            DynamicImage::ImageLuma8(gray) => PixelGrid::Gray(gray),
            DynamicImage::ImageRgb8(rgb) => PixelGrid::Rgb(rgb),
            other if other.color().has_color() => PixelGrid::Rgb(other.to_rgb8()),
            other => PixelGrid::Gray(other.to_luma8()),
        }
    }
}

/// Decodes raw upload bytes. The container format is sniffed from the
/// bytes alone; the caller's filename never takes part.
#[instrument(level = "debug", skip_all, fields(bytes = bytes.len()))]
pub fn decode(bytes: &[u8]) -> Result<PixelGrid, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if reader.format().is_none() {
        return Err(DecodeError::UnrecognizedFormat(
            "no known image signature".to_string(),
        ));
    }

    let img = reader.decode().map_err(|e| match e {
        ImageError::Unsupported(inner) => DecodeError::UnrecognizedFormat(inner.to_string()),
        other => DecodeError::Malformed(other.to_string()),
    })?;

    let grid = PixelGrid::from(img);
    if grid.is_empty() {
        return Err(DecodeError::ZeroDimension {
            width: grid.width(),
            height: grid.height(),
        });
    }

    tracing::debug!(
        width = grid.width(),
        height = grid.height(),
        channels = grid.channels(),
        "decoded image"
    );

    Ok(grid)
}
