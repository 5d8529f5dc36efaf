//! Images as they arrive from a picker or camera, and their conversion into the
//! fixed-size, normalized buffer a classifier consumes

use crate::error::ClassifyError;
use base64::{engine::general_purpose, Engine as _};
use image::{imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;
use tracing::debug;

/// Per-channel mean of the ImageNet training set
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation of the ImageNet training set
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// An in-memory representation of an image (not base 64), still encoded
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Image {
    pub(crate) data: Vec<u8>,
    pub(crate) height: Option<u32>,
    pub(crate) width: Option<u32>,
}

impl Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Image {{ data: <{} bytes>, height: {:?}, width: {:?} }}",
            self.data.len(),
            self.height,
            self.width
        )
    }
}

impl Image {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Image {
            data,
            height: None,
            width: None,
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        Ok(Image::from_bytes(std::fs::read(path)?))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A base 64 image
#[derive(Serialize, Deserialize)]
pub struct B64Image {
    pub image: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
}

impl Debug for B64Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "B64Image {{ img: <data>, height: {:?}, width: {:?} }}",
            self.height, self.width
        )
    }
}

impl From<B64Image> for Image {
    /// Undecodable base 64 becomes an empty image, which fails conversion later
    fn from(b64_img: B64Image) -> Image {
        let data = general_purpose::STANDARD
            .decode(b64_img.image.trim())
            .unwrap_or_else(|_| Vec::new());
        Image {
            data,
            height: b64_img.height,
            width: b64_img.width,
        }
    }
}

impl From<&Image> for B64Image {
    fn from(img: &Image) -> B64Image {
        B64Image {
            image: general_purpose::STANDARD.encode(&img.data),
            height: img.height,
            width: img.width,
        }
    }
}

/// The classifier's input: one RGB image, planar (CHW), resized and normalized
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl ModelInput {
    /// Shape as `[batch, channels, height, width]`
    pub fn shape(&self) -> [i64; 4] {
        [1, 3, self.height as i64, self.width as i64]
    }

    /// The normalized value of channel `c` at pixel `(x, y)`
    pub fn at(&self, c: usize, x: u32, y: u32) -> f32 {
        let width = self.width as usize;
        let plane = width * self.height as usize;
        self.data[c * plane + y as usize * width + x as usize]
    }
}

/// Decode `image` and convert it into a `width` x `height` model input
pub fn convert(image: &Image, width: u32, height: u32) -> Result<ModelInput, ClassifyError> {
    if image.is_empty() {
        return Err(ClassifyError::Conversion("image data is empty".into()));
    }

    let decoded = image::load_from_memory(&image.data)?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(ClassifyError::Conversion(format!(
            "image has no pixels ({}x{})",
            decoded.width(),
            decoded.height()
        )));
    }
    check_declared_size(image, &decoded)?;
    debug!(
        "decoded {}x{} image, resizing to {width}x{height}",
        decoded.width(),
        decoded.height()
    );

    Ok(to_input(&decoded, width, height))
}

/// A size declared alongside the data (e.g. by a `B64Image` sender) has to
/// match what was actually decoded
fn check_declared_size(image: &Image, decoded: &DynamicImage) -> Result<(), ClassifyError> {
    let width_ok = image.width.map_or(true, |w| w == decoded.width());
    let height_ok = image.height.map_or(true, |h| h == decoded.height());
    match width_ok && height_ok {
        true => Ok(()),
        false => Err(ClassifyError::Conversion(format!(
            "image declared as {}x{} but decoded as {}x{}",
            image.width.map_or("?".to_string(), |w| w.to_string()),
            image.height.map_or("?".to_string(), |h| h.to_string()),
            decoded.width(),
            decoded.height()
        ))),
    }
}

fn to_input(image: &DynamicImage, width: u32, height: u32) -> ModelInput {
    let rgb = image
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8();

    let plane = width as usize * height as usize;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = y as usize * width as usize + x as usize;
        for c in 0..3 {
            data[c * plane + offset] = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }

    ModelInput {
        width,
        height,
        data,
    }
}
