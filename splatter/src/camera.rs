use std::collections::{HashMap, HashSet};
use std::path::Path;

use indexmap::IndexMap;
use log::{info, warn};
use serde::Deserialize;

use crate::misc::{Matrix3, Matrix4, Point3, Vector2, Vector3};
use base::defs::{Error, ErrorKind::*, Result};
use base::util::fs;

const ROTATION_TOLERANCE: f64 = 1E-4;

#[derive(Deserialize)]
struct SensorEntry {
    id: u32,
    width: u32,
    height: u32,
    f: f64,
    #[serde(default)]
    cx: f64,
    #[serde(default)]
    cy: f64,
}

fn default_enabled() -> bool {
    true
}

#[derive(Deserialize)]
struct CameraEntry {
    label: String,
    #[serde(default)]
    filename: Option<String>,
    sensor_id: u32,
    #[serde(default)]
    transform: Option<Vec<f64>>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

#[derive(Deserialize)]
struct Calibration {
    sensors: Vec<SensorEntry>,
    cameras: Vec<CameraEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intrinsics {
    /// Focal length in calibration pixels.
    pub focal_length: f64,
    /// Principal point offset from the image center, in pixels.
    pub principal_offset: Vector2,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub index: usize,
    pub label: String,
    pub filename: String,
    /// Camera-to-world rotation (x right, y down, z forward).
    pub rotation: Matrix3,
    /// Camera position in world space.
    pub translation: Vector3,
    pub intrinsics: Intrinsics,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectedPoint {
    pub pixel: Vector2,
    pub depth: f64,
}

/// Camera description consumed by the rasterizer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderCamera {
    /// World-to-camera rotation.
    pub rotation: Matrix3,
    /// World origin expressed in camera space.
    pub translation: Vector3,
    /// Vertical field of view in radians.
    pub fov_y: f64,
    pub aspect: f64,
    /// Principal point offset in normalized device coordinates.
    pub principal_offset: Vector2,
    pub width: u32,
    pub height: u32,
}

impl RenderCamera {
    pub fn to_camera_space(&self, point: &Point3) -> Vector3 {
        self.rotation * point.coords + self.translation
    }

    pub fn center(&self) -> Point3 {
        Point3::from(-(self.rotation.transpose() * self.translation))
    }

    pub fn is_degenerate(&self) -> bool {
        let finite = self.rotation.iter().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite());
        !finite
            || !(self.fov_y > 0.0 && self.fov_y < std::f64::consts::PI)
            || !(self.aspect > 0.0 && self.aspect.is_finite())
    }
}

impl Camera {
    /// Projects world points into calibration pixel coordinates.
    pub fn project(&self, vertices: &[Point3]) -> Vec<ProjectedPoint> {
        let world_to_camera = self.rotation.transpose();
        let intr = &self.intrinsics;
        let center = Vector2::new(
            intr.width as f64 / 2.0 + intr.principal_offset[0],
            intr.height as f64 / 2.0 + intr.principal_offset[1],
        );

        vertices
            .iter()
            .map(|v| {
                let p = world_to_camera * (v.coords - self.translation);
                let pixel = Vector2::new(p.x / p.z, p.y / p.z)
                    * intr.focal_length
                    + center;
                ProjectedPoint { pixel, depth: p.z }
            })
            .collect()
    }

    pub fn to_render_camera(&self) -> RenderCamera {
        let intr = &self.intrinsics;
        let (w, h) = (intr.width as f64, intr.height as f64);
        let rotation = self.rotation.transpose();
        RenderCamera {
            rotation,
            translation: -(rotation * self.translation),
            fov_y: 2.0 * (h / (2.0 * intr.focal_length)).atan(),
            aspect: w / h,
            principal_offset: Vector2::new(
                2.0 * intr.principal_offset[0] / w,
                2.0 * intr.principal_offset[1] / h,
            ),
            width: intr.width,
            height: intr.height,
        }
    }
}

fn calibration_err<T>(desc: String) -> Result<T> {
    Err(Error::new(CalibrationError, desc))
}

fn parse_transform(
    label: &str,
    values: &[f64],
) -> Result<(Matrix3, Vector3)> {
    if values.len() != 16 {
        return calibration_err(format!(
            "camera '{}' has transform of {} values (expected 16)",
            label,
            values.len()
        ));
    }

    let m = Matrix4::from_row_slice(values);
    let last_row = [m[(3, 0)], m[(3, 1)], m[(3, 2)], m[(3, 3)]];
    if last_row != [0.0, 0.0, 0.0, 1.0] {
        let desc = format!("camera '{}' has non-affine transform", label);
        return calibration_err(desc);
    }

    let rotation: Matrix3 = m.fixed_slice::<3, 3>(0, 0).into_owned();
    let orthonormal = (rotation.transpose() * rotation - Matrix3::identity())
        .amax()
        <= ROTATION_TOLERANCE;
    if !orthonormal || rotation.determinant() <= 0.0 {
        let desc = format!("camera '{}' has non-rigid rotation", label);
        return calibration_err(desc);
    }

    let translation = Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
    Ok((rotation, translation))
}

/// Insertion-ordered set of calibrated cameras sharing one world scale.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CameraSet {
    cameras: IndexMap<String, Camera>,
}

impl CameraSet {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<CameraSet> {
        let path = path.as_ref();
        let err_fn = || format!("failed to load cameras '{}'", path.display());
        let data = fs::read_file(path)
            .map_err(|e| e.rekind(CalibrationError, err_fn()))?;
        let cameras = CameraSet::from_json(&data)
            .map_err(|e| e.rekind(CalibrationError, err_fn()))?;
        info!("loaded {} cameras from {}", cameras.len(), path.display());
        Ok(cameras)
    }

    pub fn from_json(data: &[u8]) -> Result<CameraSet> {
        let calibration: Calibration =
            serde_json::from_slice(data).map_err(|e| {
                let desc = "malformed calibration data".to_string();
                Error::with_source(CalibrationError, desc, e)
            })?;

        let mut sensors = HashMap::new();
        for sensor in calibration.sensors {
            if sensor.width == 0 || sensor.height == 0 {
                let desc = format!("sensor {} has zero size", sensor.id);
                return calibration_err(desc);
            }
            if !(sensor.f > 0.0 && sensor.f.is_finite()) {
                return calibration_err(format!(
                    "sensor {} has bad focal length {}",
                    sensor.id, sensor.f
                ));
            }
            sensors.insert(
                sensor.id,
                Intrinsics {
                    focal_length: sensor.f,
                    principal_offset: Vector2::new(sensor.cx, sensor.cy),
                    width: sensor.width,
                    height: sensor.height,
                },
            );
        }

        let mut cameras = IndexMap::new();
        let mut labels = HashSet::new();
        for entry in calibration.cameras {
            if !labels.insert(entry.label.clone()) {
                let desc = format!("duplicate camera label '{}'", entry.label);
                return calibration_err(desc);
            }

            let intrinsics = match sensors.get(&entry.sensor_id) {
                Some(intrinsics) => *intrinsics,
                None => {
                    return calibration_err(format!(
                        "camera '{}' refers to unknown sensor {}",
                        entry.label, entry.sensor_id
                    ))
                }
            };

            let transform = match (&entry.transform, entry.enabled) {
                (Some(transform), true) => transform,
                (None, _) => {
                    warn!("skipping unaligned camera '{}'", entry.label);
                    continue;
                }
                (_, false) => {
                    warn!("skipping disabled camera '{}'", entry.label);
                    continue;
                }
            };

            let (rotation, translation) =
                parse_transform(&entry.label, transform)?;
            let camera = Camera {
                index: cameras.len(),
                filename: entry
                    .filename
                    .unwrap_or_else(|| entry.label.clone()),
                label: entry.label,
                rotation,
                translation,
                intrinsics,
            };
            cameras.insert(camera.label.clone(), camera);
        }

        Ok(CameraSet { cameras })
    }

    /// Multiplies every camera position by the factor.
    pub fn rescale(&mut self, factor: f64) {
        for camera in self.cameras.values_mut() {
            camera.translation *= factor;
        }
    }

    /// Keeps only the first `count` cameras.
    pub fn truncate(&mut self, count: usize) {
        self.cameras.truncate(count);
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&Camera> {
        self.cameras.get(label)
    }

    pub fn get_index(&self, index: usize) -> Option<&Camera> {
        self.cameras.get_index(index).map(|(_, camera)| camera)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Camera> {
        self.cameras.values()
    }
}
