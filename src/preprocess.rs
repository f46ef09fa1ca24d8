//! Pixel grid to model input tensor.
//!
//! The steps run in a fixed order: channel reduction, resize, scaling to
//! `[0, 1]`, then NCHW assembly with a batch of one.

use crate::{decoder::PixelGrid, error::PreprocessError};
use image::{GrayImage, Luma, RgbImage};
use ndarray::Array4;
use std::borrow::Cow;
use tracing::instrument;

/// Spatial size the loaded model requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputDims {
    pub height: u32,
    pub width: u32,
}

impl InputDims {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    pub fn tensor_shape(&self) -> [usize; 4] {
        [1, 1, self.height as usize, self.width as usize]
    }
}

// BT.601 luma weights in 14-bit fixed point; they sum to 1 << 14.
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

fn luma(r: u8, g: u8, b: u8) -> u8 {
    let weighted = LUMA_R * r as u32 + LUMA_G * g as u32 + LUMA_B * b as u32;
    ((weighted + (1 << (LUMA_SHIFT - 1))) >> LUMA_SHIFT) as u8
}

pub fn to_grayscale(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        Luma([luma(r, g, b)])
    })
}

fn reduce_channels(grid: &PixelGrid) -> Cow<'_, GrayImage> {
    match grid {
        PixelGrid::Gray(gray) => Cow::Borrowed(gray),
        PixelGrid::Rgb(rgb) => Cow::Owned(to_grayscale(rgb)),
    }
}

// Source taps for one output coordinate. Pixel centres sit at half-integer
// positions and coordinates past the border clamp to the edge pixel.
fn source_taps(dst: u32, src_len: u32, dst_len: u32) -> (u32, u32, f32) {
    let scale = src_len as f32 / dst_len as f32;
    let pos = ((dst as f32 + 0.5) * scale - 0.5).clamp(0., (src_len - 1) as f32);
    let lo = pos.floor() as u32;
    let hi = (lo + 1).min(src_len - 1);
    (lo, hi, pos - lo as f32)
}

/// Two-tap bilinear resize over the clamped neighbours of each sample point.
fn resize_linear(src: &GrayImage, width: u32, height: u32) -> GrayImage {
    let columns: Vec<_> = (0..width)
        .map(|x| source_taps(x, src.width(), width))
        .collect();
    let rows: Vec<_> = (0..height)
        .map(|y| source_taps(y, src.height(), height))
        .collect();
    let at = |x: u32, y: u32| src.get_pixel(x, y).0[0] as f32;

    GrayImage::from_fn(width, height, |x, y| {
        let (x0, x1, fx) = columns[x as usize];
        let (y0, y1, fy) = rows[y as usize];
        let top = at(x0, y0) + (at(x1, y0) - at(x0, y0)) * fx;
        let bottom = at(x0, y1) + (at(x1, y1) - at(x0, y1)) * fx;
        let value = top + (bottom - top) * fy;
        Luma([value.round().clamp(0., 255.) as u8])
    })
}

fn resize_to<'a>(gray: Cow<'a, GrayImage>, dims: InputDims) -> Cow<'a, GrayImage> {
    if gray.dimensions() == (dims.width, dims.height) {
        return gray;
    }

    tracing::debug!(
        from_width = gray.width(),
        from_height = gray.height(),
        to_width = dims.width,
        to_height = dims.height,
        "resizing image"
    );
    Cow::Owned(resize_linear(&gray, dims.width, dims.height))
}

#[instrument(level = "debug", skip(grid), fields(width = grid.width(), height = grid.height()))]
pub fn preprocess(grid: &PixelGrid, dims: InputDims) -> Result<Array4<f32>, PreprocessError> {
    if grid.is_empty() {
        return Err(PreprocessError::EmptyGrid {
            width: grid.width(),
            height: grid.height(),
        });
    }

    let gray = resize_to(reduce_channels(grid), dims);
    let data: Vec<f32> = gray.as_raw().iter().map(|&v| v as f32 / 255.).collect();

    Array4::from_shape_vec(
        (1, 1, dims.height as usize, dims.width as usize),
        data,
    )
    .map_err(|e| PreprocessError::Layout(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    const MNIST: InputDims = InputDims {
        height: 28,
        width: 28,
    };

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]))
    }

    #[test]
    fn test_luma_weights() {
        assert_eq!(luma(255, 0, 0), 76);
        assert_eq!(luma(0, 255, 0), 150);
        assert_eq!(luma(0, 0, 255), 29);
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(0, 0, 0), 0);
    }

    #[test]
    fn test_grayscale_is_not_a_plain_average() {
        let red = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(2, 2, Rgb([255, 0, 0]));
        let gray = to_grayscale(&red);

        assert!(gray.pixels().all(|p| p.0 == [76]));
        assert_ne!(gray.get_pixel(0, 0).0[0], 85);
    }

    #[test]
    fn test_matching_grayscale_passes_through() {
        let img = gradient(28, 28);
        let tensor = preprocess(&PixelGrid::Gray(img.clone()), MNIST).unwrap();

        assert_eq!(tensor.shape(), &[1, 1, 28, 28]);
        for (x, y, pixel) in img.enumerate_pixels() {
            let expected = pixel.0[0] as f32 / 255.;
            assert_eq!(tensor[[0, 0, y as usize, x as usize]], expected);
        }
    }

    #[test]
    fn test_uniform_gray_value() {
        let img = GrayImage::from_pixel(28, 28, Luma([128]));
        let tensor = preprocess(&PixelGrid::Gray(img), MNIST).unwrap();

        assert!(tensor.iter().all(|&v| v == 128. / 255.));
    }

    #[test]
    fn test_shape_invariant_across_sizes() {
        for (width, height) in [(1, 1), (14, 14), (32, 32), (64, 64), (100, 7), (3, 250)] {
            let gray = PixelGrid::Gray(gradient(width, height));
            let color = PixelGrid::Rgb(ImageBuffer::from_pixel(width, height, Rgb([10, 200, 30])));

            for grid in [gray, color] {
                let tensor = preprocess(&grid, MNIST).unwrap();
                assert_eq!(tensor.shape(), &[1, 1, 28, 28], "{}x{}", width, height);
            }
        }
    }

    #[test]
    fn test_color_image_resized_and_reduced() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(64, 64, Rgb([0, 255, 0]));
        let tensor = preprocess(&PixelGrid::Rgb(img), MNIST).unwrap();

        assert_eq!(tensor.shape(), &[1, 1, 28, 28]);
        for &v in tensor.iter() {
            assert!((v - 150. / 255.).abs() < 1e-6);
        }
    }

    #[test]
    fn test_integer_shrink_samples_source_pixels() {
        // Every output pixel of an exact 3x shrink lands on source column 3d + 1.
        let img = GrayImage::from_fn(84, 84, |x, _| Luma([if x % 3 == 1 { 255 } else { 0 }]));
        let tensor = preprocess(&PixelGrid::Gray(img), MNIST).unwrap();

        assert_eq!(tensor[[0, 0, 0, 0]], 1.0);
        assert!(tensor.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_upscale_uses_half_pixel_centres_and_clamps_edges() {
        let img = GrayImage::from_raw(2, 1, vec![0, 100]).unwrap();
        let resized = resize_linear(&img, 4, 1);

        assert_eq!(resized.as_raw(), &vec![0, 25, 75, 100]);
    }

    #[test]
    fn test_values_stay_in_unit_range() {
        let img = GrayImage::from_fn(45, 17, |x, _| Luma([if x % 2 == 0 { 0 } else { 255 }]));
        let tensor = preprocess(&PixelGrid::Gray(img), MNIST).unwrap();

        assert!(tensor.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_non_square_model_input() {
        let dims = InputDims::new(16, 40);
        let tensor = preprocess(&PixelGrid::Gray(gradient(20, 20)), dims).unwrap();

        assert_eq!(tensor.shape(), &dims.tensor_shape());
    }

    #[test]
    fn test_empty_grid_is_rejected() {
        let err = preprocess(&PixelGrid::Gray(GrayImage::new(0, 0)), MNIST).unwrap_err();
        assert_eq!(
            err,
            PreprocessError::EmptyGrid {
                width: 0,
                height: 0
            }
        );
    }
}
