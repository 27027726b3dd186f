use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use image::RgbImage;
use log::debug;
use rayon::prelude::*;
use structopt::StructOpt;

use crate::camera::RenderCamera;
use crate::mesh::Mesh;
use crate::misc::{vector3_to_rgb, Point3, Vector2, Vector3};
use base::defs::{Error, ErrorKind::*, Result};
use base::util::cli::{parse_color, Array as CliArray};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Device {
    Cpu,
    CpuParallel,
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(Device::Cpu),
            "cpu-parallel" => Ok(Device::CpuParallel),
            _ => Err(Error::new(
                MalformedData,
                "unknown device (can be 'cpu' or 'cpu-parallel')".to_string(),
            )),
        }
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::CpuParallel => write!(f, "cpu-parallel"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub location: Point3,
    pub ambient: Vector3,
    pub diffuse: Vector3,
    pub specular: Vector3,
}

impl PointLight {
    pub fn at(location: Point3) -> Self {
        Self {
            location,
            ambient: Vector3::from_element(0.5),
            diffuse: Vector3::from_element(0.3),
            specular: Vector3::from_element(0.2),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub ambient: Vector3,
    pub diffuse: Vector3,
    pub specular: Vector3,
    pub shininess: f64,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ambient: Vector3::from_element(1.0),
            diffuse: Vector3::from_element(1.0),
            specular: Vector3::from_element(1.0),
            shininess: 64.0,
        }
    }
}

#[derive(Clone, Debug, StructOpt)]
pub struct RenderParams {
    #[structopt(
        help = "Rendering device (cpu or cpu-parallel)",
        long,
        default_value = "cpu"
    )]
    pub device: Device,

    #[structopt(
        help = "Point light location in world coordinates",
        long,
        allow_hyphen_values = true,
        default_value = "0,0,-3"
    )]
    pub light_location: CliArray<f64, 3>,

    #[structopt(
        help = "Background color of rendered views",
        long,
        parse(try_from_str = parse_color),
        default_value = "#ffffff"
    )]
    pub background: [u8; 3],

    #[structopt(
        help = "Triangles closer to the camera than this are skipped",
        long,
        default_value = "0.001"
    )]
    pub z_near: f64,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            light_location: CliArray([0.0, 0.0, -3.0]),
            background: [255, 255, 255],
            z_near: 0.001,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Fragment {
    face: usize,
    barycentric: Vector3,
    depth: f64,
}

struct ScreenVertex {
    pixel: Vector2,
    depth: f64,
}

fn edge(a: &Vector2, b: &Vector2, p: &Vector2) -> f64 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

fn project_vertices(
    mesh: &Mesh,
    camera: &RenderCamera,
    (width, height): (u32, u32),
) -> Vec<ScreenVertex> {
    let tan_y = (camera.fov_y / 2.0).tan();
    let tan_x = tan_y * camera.aspect;
    let (w, h) = (width as f64, height as f64);

    mesh.vertices
        .iter()
        .map(|v| {
            let p = camera.to_camera_space(v);
            let ndc = Vector2::new(
                p.x / (p.z * tan_x) + camera.principal_offset[0],
                p.y / (p.z * tan_y) + camera.principal_offset[1],
            );
            let pixel = Vector2::new(
                (ndc[0] + 1.0) / 2.0 * w,
                (ndc[1] + 1.0) / 2.0 * h,
            );
            ScreenVertex { pixel, depth: p.z }
        })
        .collect()
}

/// Z-buffer rasterization with one sample per pixel center.
fn rasterize(
    mesh: &Mesh,
    screen: &[ScreenVertex],
    (width, height): (u32, u32),
    z_near: f64,
) -> Vec<Option<Fragment>> {
    let (w, h) = (width as usize, height as usize);
    let mut fragments: Vec<Option<Fragment>> = vec![None; w * h];
    let mut num_skipped = 0;

    for (i, face) in mesh.faces.iter().enumerate() {
        let [a, b, c] = [&screen[face[0]], &screen[face[1]], &screen[face[2]]];
        if a.depth <= z_near || b.depth <= z_near || c.depth <= z_near {
            num_skipped += 1;
            continue;
        }

        let area = edge(&a.pixel, &b.pixel, &c.pixel);
        if area.abs() < f64::EPSILON || !area.is_finite() {
            continue;
        }

        let min_x = a.pixel[0].min(b.pixel[0]).min(c.pixel[0]);
        let max_x = a.pixel[0].max(b.pixel[0]).max(c.pixel[0]);
        let min_y = a.pixel[1].min(b.pixel[1]).min(c.pixel[1]);
        let max_y = a.pixel[1].max(b.pixel[1]).max(c.pixel[1]);
        if max_x < 0.0 || max_y < 0.0 || min_x > w as f64 || min_y > h as f64
        {
            continue;
        }

        let x0 = (min_x - 0.5).ceil().max(0.0) as usize;
        let y0 = (min_y - 0.5).ceil().max(0.0) as usize;
        let x1 = ((max_x - 0.5).floor() as isize).min(w as isize - 1);
        let y1 = ((max_y - 0.5).floor() as isize).min(h as isize - 1);
        if x1 < 0 || y1 < 0 {
            continue;
        }

        for y in y0..=y1 as usize {
            for x in x0..=x1 as usize {
                let p = Vector2::new(x as f64 + 0.5, y as f64 + 0.5);
                let w0 = edge(&b.pixel, &c.pixel, &p) / area;
                let w1 = edge(&c.pixel, &a.pixel, &p) / area;
                let w2 = edge(&a.pixel, &b.pixel, &p) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }

                // Perspective-correct interpolation.
                let inv = Vector3::new(
                    w0 / a.depth,
                    w1 / b.depth,
                    w2 / c.depth,
                );
                let inv_depth = inv.sum();
                let depth = 1.0 / inv_depth;

                let slot = &mut fragments[y * w + x];
                if slot.map_or(true, |f| depth < f.depth) {
                    *slot = Some(Fragment {
                        face: i,
                        barycentric: inv / inv_depth,
                        depth,
                    });
                }
            }
        }
    }

    if num_skipped > 0 {
        debug!("skipped {} faces crossing the near plane", num_skipped);
    }

    fragments
}

struct Shader<'a> {
    mesh: &'a Mesh,
    normals: Vec<Vector3>,
    eye: Point3,
    light: PointLight,
    material: Material,
}

impl<'a> Shader<'a> {
    fn shade(&self, fragment: &Fragment) -> Vector3 {
        let face = self.mesh.faces[fragment.face];
        let b = fragment.barycentric;

        let mut position = Vector3::zeros();
        let mut normal = Vector3::zeros();
        let mut texel = Vector3::zeros();
        for k in 0..3 {
            let v = face[k];
            let [r, g, bl] = self.mesh.colors[v];
            position += self.mesh.vertices[v].coords * b[k];
            normal += self.normals[v] * b[k];
            texel += Vector3::new(r as f64, g as f64, bl as f64) / 255.0 * b[k];
        }
        let normal = normal.try_normalize(f64::EPSILON).unwrap_or(normal);

        let light_dir = (self.light.location.coords - position)
            .try_normalize(f64::EPSILON)
            .unwrap_or_else(Vector3::zeros);
        let view_dir = (self.eye.coords - position)
            .try_normalize(f64::EPSILON)
            .unwrap_or_else(Vector3::zeros);

        let cos_angle = normal.dot(&light_dir);
        let ambient = self.material.ambient.component_mul(&self.light.ambient);
        let diffuse = self
            .material
            .diffuse
            .component_mul(&self.light.diffuse)
            * cos_angle.max(0.0);

        let specular = if cos_angle > 0.0 {
            let reflect = -light_dir + 2.0 * cos_angle * normal;
            let alpha = view_dir.dot(&reflect).max(0.0);
            self.material.specular.component_mul(&self.light.specular)
                * alpha.powf(self.material.shininess)
        } else {
            Vector3::zeros()
        };

        ((ambient + diffuse).component_mul(&texel) + specular) * 255.0
    }

    fn shade_row(
        &self,
        y: usize,
        row: &mut [u8],
        fragments: &[Option<Fragment>],
    ) {
        let width = row.len() / 3;
        for x in 0..width {
            if let Some(fragment) = &fragments[y * width + x] {
                let rgb = vector3_to_rgb(self.shade(fragment));
                row[x * 3..x * 3 + 3].copy_from_slice(&rgb.0);
            }
        }
    }
}

/// Renders the mesh as seen by the camera with Phong shading.
pub fn render(
    mesh: &Mesh,
    camera: &RenderCamera,
    image_size: (u32, u32),
    params: &RenderParams,
) -> Result<RgbImage> {
    if mesh.vertices.is_empty() || mesh.faces.is_empty() {
        let desc = "cannot render empty mesh".to_string();
        return Err(Error::new(RenderError, desc));
    }

    let (width, height) = image_size;
    if width == 0 || height == 0 {
        let desc = format!("bad image size {}x{}", width, height);
        return Err(Error::new(RenderError, desc));
    }

    if camera.is_degenerate() {
        let desc = "cannot render with degenerate camera".to_string();
        return Err(Error::new(RenderError, desc));
    }

    if mesh.colors.len() != mesh.vertices.len()
        || mesh.faces.iter().flatten().any(|&i| i >= mesh.vertices.len())
    {
        let desc = "cannot render inconsistent mesh".to_string();
        return Err(Error::new(RenderError, desc));
    }

    let screen = project_vertices(mesh, camera, image_size);
    let fragments = rasterize(mesh, &screen, image_size, params.z_near);

    let [lx, ly, lz] = params.light_location.0;
    let shader = Shader {
        mesh,
        normals: mesh.vertex_normals(),
        eye: camera.center(),
        light: PointLight::at(Point3::new(lx, ly, lz)),
        material: Material::default(),
    };

    let row_len = width as usize * 3;
    let mut buffer: Vec<u8> = params
        .background
        .iter()
        .copied()
        .cycle()
        .take(row_len * height as usize)
        .collect();

    match params.device {
        Device::Cpu => buffer
            .chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| shader.shade_row(y, row, &fragments)),
        Device::CpuParallel => buffer
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| shader.shade_row(y, row, &fragments)),
    }

    RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
        let desc = "failed to assemble rendered image".to_string();
        Error::new(RenderError, desc)
    })
}
