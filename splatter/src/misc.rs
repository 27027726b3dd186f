// Typedefs and small helpers shared by the projection, aggregation and
// rendering code.

use std::path::Path;

use image::io::Reader as ImageReader;
use image::{Rgb, RgbImage};

use base::defs::{Error, ErrorKind::*, Result};

pub type Vector2 = nalgebra::Vector2<f64>;
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Vector4 = nalgebra::Vector4<f64>;
pub type Point3 = nalgebra::Point3<f64>;
pub type Matrix3 = nalgebra::Matrix3<f64>;
pub type Matrix4 = nalgebra::Matrix4<f64>;

pub fn get_pixel_as_vector3(x: u32, y: u32, image: &RgbImage) -> Vector3 {
    let p = image.get_pixel(x, y);
    Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64)
}

pub fn vector3_to_rgb(color: Vector3) -> Rgb<u8> {
    let [r, g, b] = color.as_ref();
    let r1 = r.clamp(0.0, 255.0).round() as u8;
    let g1 = g.clamp(0.0, 255.0).round() as u8;
    let b1 = b.clamp(0.0, 255.0).round() as u8;
    Rgb([r1, g1, b1])
}

/// Bilinearly samples the image at continuous pixel coordinates.
///
/// Pixel `k` covers `[k, k + 1)`, so its center is at `k + 0.5`.
/// Neighbours outside the image are clamped to the edge.
pub fn sample_pixel(pixel: Vector2, image: &RgbImage) -> Vector3 {
    let (w, h) = image.dimensions();
    let x = (pixel[0] - 0.5).clamp(0.0, (w - 1) as f64);
    let y = (pixel[1] - 0.5).clamp(0.0, (h - 1) as f64);
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (dx, dy) = (x - x0 as f64, y - y0 as f64);
    let s00 = get_pixel_as_vector3(x0, y0, image);
    let s10 = get_pixel_as_vector3(x1, y0, image);
    let s01 = get_pixel_as_vector3(x0, y1, image);
    let s11 = get_pixel_as_vector3(x1, y1, image);
    let s0 = (1.0 - dx) * s00 + dx * s10;
    let s1 = (1.0 - dx) * s01 + dx * s11;
    (1.0 - dy) * s0 + dy * s1
}

pub fn read_image(path: &Path) -> Result<RgbImage> {
    let err_fn = || format!("failed to read image '{}'", path.display());
    let img = ImageReader::open(path)
        .map_err(|e| Error::with_source(ImageReadError, err_fn(), e))?
        .with_guessed_format()
        .map_err(|e| Error::with_source(ImageReadError, err_fn(), e))?
        .decode()
        .map_err(|e| Error::with_source(ImageReadError, err_fn(), e))?;
    Ok(img.into_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;

    use base::assert_eq_f32;

    #[test]
    fn test_sample_pixel_centers_and_midpoints() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([0, 0, 0]));
        image.put_pixel(1, 0, Rgb([100, 200, 50]));

        let c = sample_pixel(Vector2::new(0.5, 0.5), &image);
        assert_eq_f32!(c[0], 0.0);

        let c = sample_pixel(Vector2::new(1.5, 0.5), &image);
        assert_eq_f32!(c[1], 200.0);

        let c = sample_pixel(Vector2::new(1.0, 0.5), &image);
        assert_eq_f32!(c[0], 50.0);
        assert_eq_f32!(c[1], 100.0);
        assert_eq_f32!(c[2], 25.0);

        // Clamped to the edge.
        let c = sample_pixel(Vector2::new(1.99, 0.99), &image);
        assert_eq_f32!(c[0], 100.0);
    }

    #[test]
    fn test_read_missing_image() {
        let err = read_image(Path::new("/no/such/image.png")).unwrap_err();
        assert_eq!(err.kind, ImageReadError);
        assert_eq!(
            &err.description,
            "failed to read image '/no/such/image.png'"
        );
    }

    #[test]
    fn test_vector3_to_rgb_clamps() {
        let rgb = vector3_to_rgb(Vector3::new(-3.0, 127.6, 300.0));
        assert_eq!(rgb, Rgb([0, 128, 255]));
    }
}
