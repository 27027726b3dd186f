use std::path::{Path, PathBuf};

use image::RgbImage;
use log::{info, warn};
use rayon::prelude::*;
use structopt::StructOpt;

use crate::aggregation::ColorAccumulator;
use crate::camera::Camera;
use crate::masked::{complete_color, MaskedColors};
use crate::mesh::{Color, Mesh};
use crate::misc::{read_image, vector3_to_rgb};
use crate::projection::splat_mesh_vertices;
use crate::scene::{Scene, SceneParams};
use base::defs::{ErrorKind::*, Result};
use base::util::cli::parse_color;

#[derive(Clone, Debug, StructOpt)]
pub struct AggregateColorsParams {
    #[structopt(help = "Fold camera images on all CPU cores", long)]
    pub parallel: bool,

    #[structopt(help = "Output .ply mesh with aggregated colors", long)]
    pub out_mesh: Option<PathBuf>,

    #[structopt(
        help = "Color of vertices no camera has observed",
        long,
        parse(try_from_str = parse_color),
        default_value = "#ff00ff"
    )]
    pub no_data_color: Color,
}

impl Default for AggregateColorsParams {
    fn default() -> Self {
        Self {
            parallel: false,
            out_mesh: None,
            no_data_color: [255, 0, 255],
        }
    }
}

#[derive(StructOpt)]
#[structopt(about = "Aggregate per-vertex colors from camera images")]
pub struct AggregateColorsCommand {
    #[structopt(flatten)]
    scene_params: SceneParams,

    #[structopt(flatten)]
    params: AggregateColorsParams,
}

impl AggregateColorsCommand {
    pub fn run(&self) -> Result<()> {
        let scene = Scene::load(&self.scene_params)?;
        aggregate_colors_with_params(&scene, &self.params).map(|_| ())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregationReport {
    pub mean_colors: MaskedColors,
    pub num_folded: usize,
    pub num_skipped: usize,
    /// Vertices with at least one observed channel.
    pub num_observed_vertices: usize,
}

struct Partial {
    accumulator: ColorAccumulator,
    num_folded: usize,
    num_skipped: usize,
}

impl Partial {
    fn new(num_vertices: usize) -> Self {
        Self {
            accumulator: ColorAccumulator::new(num_vertices),
            num_folded: 0,
            num_skipped: 0,
        }
    }

    fn fold_camera<R>(
        mut self,
        scene: &Scene,
        camera: &Camera,
        read_image: &R,
    ) -> Result<Self>
    where
        R: Fn(&Path) -> Result<RgbImage>,
    {
        let image = match read_image(&scene.image_path(camera)) {
            Ok(image) => image,
            Err(err) if err.kind == ImageReadError => {
                warn!("skipping camera '{}': {}", camera.label, err);
                self.num_skipped += 1;
                return Ok(self);
            }
            Err(err) => return Err(err),
        };

        let colors = splat_mesh_vertices(camera, &scene.mesh.vertices, &image);
        self.accumulator = self.accumulator.fold(&colors)?;
        self.num_folded += 1;
        Ok(self)
    }

    fn merge(self, other: Partial) -> Result<Self> {
        Ok(Self {
            accumulator: self.accumulator.merge(other.accumulator)?,
            num_folded: self.num_folded + other.num_folded,
            num_skipped: self.num_skipped + other.num_skipped,
        })
    }

    fn finalize(self) -> AggregationReport {
        AggregationReport {
            num_observed_vertices: self.accumulator.num_observed_vertices(),
            mean_colors: self.accumulator.finalize(),
            num_folded: self.num_folded,
            num_skipped: self.num_skipped,
        }
    }
}

/// Folds the colors every camera sees into per-vertex means.
///
/// Cameras whose image cannot be read are skipped and counted. With
/// `parallel`, cameras are split across rayon workers whose partial sums
/// are merged before the means are taken.
pub fn aggregate_colors<R>(
    scene: &Scene,
    parallel: bool,
    read_image: R,
) -> Result<AggregationReport>
where
    R: Fn(&Path) -> Result<RgbImage> + Sync,
{
    let num_vertices = scene.mesh.vertices.len();

    let partial = if parallel {
        let cameras: Vec<&Camera> = scene.cameras.iter().collect();
        cameras
            .into_par_iter()
            .try_fold(
                || Partial::new(num_vertices),
                |partial, camera| {
                    partial.fold_camera(scene, camera, &read_image)
                },
            )
            .try_reduce(|| Partial::new(num_vertices), Partial::merge)?
    } else {
        let mut partial = Partial::new(num_vertices);
        for camera in scene.cameras.iter() {
            partial = partial.fold_camera(scene, camera, &read_image)?;
        }
        partial
    };

    let report = partial.finalize();
    info!(
        "folded {} cameras ({} skipped), {} of {} vertices have colors",
        report.num_folded,
        report.num_skipped,
        report.num_observed_vertices,
        num_vertices
    );

    Ok(report)
}

/// Mean colors as mesh colors, vertices without data get `no_data_color`.
pub fn colors_with_no_data(
    mean_colors: &MaskedColors,
    no_data_color: Color,
) -> Vec<Color> {
    mean_colors
        .iter()
        .map(|color| match complete_color(color) {
            Some(color) => vector3_to_rgb(color).0,
            None => no_data_color,
        })
        .collect()
}

pub fn export_colored_mesh(
    mesh: &Mesh,
    report: &AggregationReport,
    no_data_color: Color,
    path: &Path,
) -> Result<()> {
    let colors = colors_with_no_data(&report.mean_colors, no_data_color);
    mesh.with_colors(colors)?.save(path)?;
    info!("saved aggregated colors to '{}'", path.display());
    Ok(())
}

pub fn aggregate_colors_with_params(
    scene: &Scene,
    params: &AggregateColorsParams,
) -> Result<AggregationReport> {
    let report = aggregate_colors(scene, params.parallel, read_image)?;
    if let Some(path) = &params.out_mesh {
        export_colored_mesh(&scene.mesh, &report, params.no_data_color, path)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;
    use crate::masked::{is_unobserved, UNOBSERVED_COLOR};
    use crate::scene::tests::test_scene;
    use base::assert_eq_f32;
    use base::defs::Error;

    fn read_uniform_image(path: &Path) -> Result<RgbImage> {
        let value = if path.ends_with("left.png") { 10 } else { 20 };
        Ok(RgbImage::from_pixel(32, 32, Rgb([value; 3])))
    }

    fn assert_gray(report: &AggregationReport, vertex: usize, value: f64) {
        let color = complete_color(&report.mean_colors[vertex]).unwrap();
        for c in 0..3 {
            assert_eq_f32!(color[c], value);
        }
    }

    #[test]
    fn test_overlapping_cameras() {
        let scene = test_scene();
        let report = aggregate_colors(&scene, false, read_uniform_image)
            .unwrap();

        assert_eq!(report.num_folded, 2);
        assert_eq!(report.num_skipped, 0);
        assert_gray(&report, 0, 10.0);
        assert_gray(&report, 1, 10.0);
        assert_gray(&report, 2, 15.0);
        assert_gray(&report, 3, 20.0);
        assert_gray(&report, 4, 20.0);
    }

    #[test]
    fn test_cameras_see_nothing() {
        let mut scene = test_scene();
        scene.cameras.truncate(1);
        scene.cameras.rescale(-1.0);

        let report = aggregate_colors(&scene, false, read_uniform_image)
            .unwrap();
        assert_eq!(report.num_folded, 1);
        assert_eq!(report.mean_colors, vec![UNOBSERVED_COLOR; 5]);
        assert_eq!(report.num_observed_vertices, 0);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let scene = test_scene();
        let sequential =
            aggregate_colors(&scene, false, read_uniform_image).unwrap();
        let parallel =
            aggregate_colors(&scene, true, read_uniform_image).unwrap();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_unreadable_image_is_skipped() {
        let scene = test_scene();
        let read = |path: &Path| {
            if path.ends_with("right.png") {
                let desc = format!("failed to read '{}'", path.display());
                Err(Error::new(ImageReadError, desc))
            } else {
                read_uniform_image(path)
            }
        };

        for parallel in [false, true] {
            let report = aggregate_colors(&scene, parallel, read).unwrap();
            assert_eq!(report.num_folded, 1);
            assert_eq!(report.num_skipped, 1);
            assert_gray(&report, 2, 10.0);
            assert!(is_unobserved(&report.mean_colors[3]));
            assert!(is_unobserved(&report.mean_colors[4]));
        }
    }

    #[test]
    fn test_other_errors_abort() {
        let scene = test_scene();
        let err = aggregate_colors(&scene, false, |_| {
            Err(Error::new(IoError, "device lost".to_string()))
        })
        .unwrap_err();
        assert_eq!(err.kind, IoError);
    }

    #[test]
    fn test_colors_with_no_data() {
        let scene = test_scene();
        let read = |path: &Path| {
            if path.ends_with("right.png") {
                let desc = "missing".to_string();
                Err(Error::new(ImageReadError, desc))
            } else {
                read_uniform_image(path)
            }
        };
        let report = aggregate_colors(&scene, false, read).unwrap();

        let colors = colors_with_no_data(&report.mean_colors, [255, 0, 255]);
        assert_eq!(
            colors,
            vec![
                [10, 10, 10],
                [10, 10, 10],
                [10, 10, 10],
                [255, 0, 255],
                [255, 0, 255]
            ]
        );
    }
}
