use image::RgbImage;

use crate::camera::Camera;
use crate::masked::{observed_color, MaskedColors, UNOBSERVED_COLOR};
use crate::misc::{sample_pixel, Point3, Vector2};

/// Samples the image color of every vertex the camera sees.
///
/// A vertex is observed when it lies in front of the camera and projects
/// strictly inside the image. Occlusion is not taken into account.
/// Calibration pixels are scaled to the image resolution, so downsampled
/// images can be used as is.
pub fn splat_mesh_vertices(
    camera: &Camera,
    vertices: &[Point3],
    image: &RgbImage,
) -> MaskedColors {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return vec![UNOBSERVED_COLOR; vertices.len()];
    }

    let scale = Vector2::new(
        width as f64 / camera.intrinsics.width as f64,
        height as f64 / camera.intrinsics.height as f64,
    );
    let (w, h) = (width as f64, height as f64);

    camera
        .project(vertices)
        .into_iter()
        .map(|point| {
            let pixel = point.pixel.component_mul(&scale);
            let inside = pixel[0] > 0.0
                && pixel[0] < w
                && pixel[1] > 0.0
                && pixel[1] < h;
            if point.depth > 0.0 && inside {
                observed_color(sample_pixel(pixel, image))
            } else {
                UNOBSERVED_COLOR
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;
    use crate::camera::tests::forward_camera;
    use crate::masked::{complete_color, is_unobserved};
    use crate::misc::Vector3;
    use base::assert_eq_f32;

    #[test]
    fn test_all_vertices_outside_frustum() {
        let camera = forward_camera(Vector3::new(0.0, 0.0, -2.0), 40, 30);
        let image = RgbImage::from_pixel(40, 30, Rgb([10, 20, 30]));
        let vertices = vec![
            Point3::new(0.0, 0.0, -5.0),
            Point3::new(100.0, 0.0, 0.0),
            Point3::new(0.0, -100.0, 1.0),
        ];

        let colors = splat_mesh_vertices(&camera, &vertices, &image);
        assert_eq!(colors.len(), 3);
        assert!(colors.iter().all(is_unobserved));
    }

    #[test]
    fn test_vertex_at_camera_center_is_unobserved() {
        let camera = forward_camera(Vector3::new(0.0, 0.0, 0.0), 40, 30);
        let image = RgbImage::from_pixel(40, 30, Rgb([10, 20, 30]));
        let colors =
            splat_mesh_vertices(&camera, &[Point3::origin()], &image);
        assert!(is_unobserved(&colors[0]));
    }

    #[test]
    fn test_samples_visible_vertices() {
        let camera = forward_camera(Vector3::new(0.0, 0.0, -2.0), 40, 30);
        let mut image = RgbImage::from_pixel(40, 30, Rgb([10, 20, 30]));
        image.put_pixel(29, 14, Rgb([200, 100, 0]));

        // Projects to the center of pixel (29, 14).
        let x = (29.5 - 20.0) / 40.0 * 2.0;
        let y = (14.5 - 15.0) / 40.0 * 2.0;
        let vertices = vec![Point3::new(x, y, 0.0), Point3::origin()];

        let colors = splat_mesh_vertices(&camera, &vertices, &image);
        let c0 = complete_color(&colors[0]).unwrap();
        assert_eq_f32!(c0[0], 200.0);
        assert_eq_f32!(c0[1], 100.0);
        assert_eq_f32!(c0[2], 0.0);

        let c1 = complete_color(&colors[1]).unwrap();
        assert_eq_f32!(c1[0], 10.0);
    }

    #[test]
    fn test_downsampled_image() {
        let camera = forward_camera(Vector3::new(0.0, 0.0, -2.0), 40, 30);
        let mut image = RgbImage::from_pixel(20, 15, Rgb([0, 0, 0]));
        image.put_pixel(14, 7, Rgb([90, 90, 90]));

        // Full-resolution pixel (29, 14.5) is (14.5, 7.25) at half size.
        let x = (29.0 - 20.0) / 40.0 * 2.0;
        let y = (14.5 - 15.0) / 40.0 * 2.0;
        let colors =
            splat_mesh_vertices(&camera, &[Point3::new(x, y, 0.0)], &image);
        let c = complete_color(&colors[0]).unwrap();
        assert_eq_f32!(c[0], 90.0 * 0.75);
    }
}
