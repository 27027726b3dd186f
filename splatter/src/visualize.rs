use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};

use crate::misc::{get_pixel_as_vector3, vector3_to_rgb};
use base::defs::{Error, ErrorKind::*, Result};

/// Places the rendered view on the left and the real photo on the right.
///
/// The real photo is multiplied by `gain` (and clamped) for display, and
/// resized to the rendered view height if needed.
pub fn make_pair_image(
    rendered: &RgbImage,
    real: &RgbImage,
    gain: f64,
) -> RgbImage {
    let (rw, rh) = rendered.dimensions();
    let real = if real.height() != rh && real.height() > 0 {
        let width = (real.width() as f64 * rh as f64 / real.height() as f64)
            .round()
            .max(1.0) as u32;
        image::imageops::resize(
            real,
            width,
            rh,
            image::imageops::FilterType::Triangle,
        )
    } else {
        real.clone()
    };

    let mut pair = RgbImage::from_pixel(rw + real.width(), rh, Rgb([0; 3]));
    for (x, y, pixel) in rendered.enumerate_pixels() {
        pair.put_pixel(x, y, *pixel);
    }
    for y in 0..real.height().min(rh) {
        for x in 0..real.width() {
            let color = get_pixel_as_vector3(x, y, &real) * gain;
            pair.put_pixel(rw + x, y, vector3_to_rgb(color));
        }
    }

    pair
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut data), ImageOutputFormat::Png)
        .map_err(|e| {
            let desc = "failed to encode PNG image".to_string();
            Error::with_source(IoError, desc, e)
        })?;
    Ok(data)
}

pub fn pair_image_path(vis_dir: &Path, index: usize) -> PathBuf {
    vis_dir.join(format!("pred_{:03}.png", index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_pair_image() {
        let rendered = RgbImage::from_pixel(3, 2, Rgb([1, 2, 3]));
        let real = RgbImage::from_pixel(2, 2, Rgb([10, 50, 100]));
        let pair = make_pair_image(&rendered, &real, 4.0);

        assert_eq!(pair.dimensions(), (5, 2));
        assert_eq!(*pair.get_pixel(2, 1), Rgb([1, 2, 3]));
        assert_eq!(*pair.get_pixel(3, 0), Rgb([40, 200, 255]));
    }

    #[test]
    fn test_pair_resizes_real_image() {
        let rendered = RgbImage::new(4, 4);
        let real = RgbImage::from_pixel(8, 8, Rgb([20, 20, 20]));
        let pair = make_pair_image(&rendered, &real, 1.0);
        assert_eq!(pair.dimensions(), (8, 4));
        assert_eq!(*pair.get_pixel(7, 3), Rgb([20, 20, 20]));
    }

    #[test]
    fn test_encode_png() {
        let data = encode_png(&RgbImage::new(2, 2)).unwrap();
        assert_eq!(&data[1..4], b"PNG");
        assert_eq!(
            pair_image_path(Path::new("vis"), 7),
            Path::new("vis/pred_007.png")
        );
    }
}
