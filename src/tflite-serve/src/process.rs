use std::convert::TryFrom;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

use crate::error::{ClassifyError, Result};

/// Image data laid out as the model's NHWC `f32` input.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

fn dimension(value: usize, shape: &[usize]) -> Result<u32> {
    u32::try_from(value).map_err(|_| ClassifyError::InvalidShape(shape.to_vec()))
}

/// Center square crop, resize to the input shape, and scale `[0, 255]` to `[0, 1]`.
///
/// Only batch-of-one RGB inputs are accepted: `[1, height, width, 3]`.
pub fn process_image(image: &DynamicImage, input_shape: &[usize]) -> Result<ImageTensor> {
    let (height, width) = match input_shape {
        &[1, h, w, 3] if h > 0 && w > 0 => (h, w),
        _ => return Err(ClassifyError::InvalidShape(input_shape.to_vec())),
    };
    let (height, width) = (
        dimension(height, input_shape)?,
        dimension(width, input_shape)?,
    );

    let rgb = center_square(image.to_rgb8());

    let resized = if rgb.width() != width || rgb.height() != height {
        imageops::resize(&rgb, width, height, FilterType::CatmullRom)
    } else {
        rgb
    };

    let data: Vec<f32> = resized
        .into_raw()
        .iter()
        .map(|x| *x as f32 / 255f32)
        .collect();

    Ok(ImageTensor {
        shape: input_shape.to_vec(),
        data,
    })
}

fn center_square(rgb: RgbImage) -> RgbImage {
    let (width, height) = rgb.dimensions();
    if width == height {
        return rgb;
    }

    let side = width.min(height);
    let left = (width - side) / 2;
    let top = (height - side) / 2;

    imageops::crop_imm(&rgb, left, top, side, side).to_image()
}
