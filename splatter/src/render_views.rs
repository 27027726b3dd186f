use std::path::{Path, PathBuf};

use image::RgbImage;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use structopt::StructOpt;

use crate::camera::Camera;
use crate::misc::read_image;
use crate::render::{render, RenderParams};
use crate::scene::{Scene, SceneParams};
use crate::visualize::{encode_png, make_pair_image, pair_image_path};
use base::defs::{ErrorKind::*, Result};
use base::util::fs;

#[derive(Clone, Debug, StructOpt)]
pub struct RenderViewsParams {
    #[structopt(
        help = "Output folder for rendered|real image pairs",
        long,
        default_value = "vis"
    )]
    pub vis_dir: PathBuf,

    #[structopt(
        help = "Real image brightness gain in image pairs",
        long,
        default_value = "4.0"
    )]
    pub real_image_gain: f64,

    #[structopt(help = "Shuffle camera order with this seed", long)]
    pub shuffle_seed: Option<u64>,

    #[structopt(flatten)]
    pub render_params: RenderParams,
}

impl Default for RenderViewsParams {
    fn default() -> Self {
        Self {
            vis_dir: PathBuf::from("vis"),
            real_image_gain: 4.0,
            shuffle_seed: None,
            render_params: RenderParams::default(),
        }
    }
}

#[derive(StructOpt)]
#[structopt(about = "Render mesh views next to the real camera images")]
pub struct RenderViewsCommand {
    #[structopt(flatten)]
    scene_params: SceneParams,

    #[structopt(flatten)]
    params: RenderViewsParams,
}

impl RenderViewsCommand {
    pub fn run(&self) -> Result<()> {
        let scene = Scene::load(&self.scene_params)?;
        render_views_to_files(&scene, &self.params).map(|_| ())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderReport {
    pub rendered: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Cameras in processing order.
pub fn camera_order<'a>(
    scene: &'a Scene,
    shuffle_seed: Option<u64>,
) -> Vec<&'a Camera> {
    let mut cameras: Vec<_> = scene.cameras.iter().collect();
    if let Some(seed) = shuffle_seed {
        cameras.shuffle(&mut StdRng::seed_from_u64(seed));
    }
    cameras
}

pub fn render_views_to_files(
    scene: &Scene,
    params: &RenderViewsParams,
) -> Result<RenderReport> {
    fs::ensure_dir(&params.vis_dir)?;
    render_views(scene, params, read_image, |path, image| {
        fs::write_file(path, &encode_png(image)?)
    })
}

pub fn render_views<R, W>(
    scene: &Scene,
    params: &RenderViewsParams,
    mut read_image: R,
    mut write_image: W,
) -> Result<RenderReport>
where
    R: FnMut(&Path) -> Result<RgbImage>,
    W: FnMut(&Path, &RgbImage) -> Result<()>,
{
    let mut report = RenderReport::default();

    for camera in camera_order(scene, params.shuffle_seed) {
        let real = match read_image(&scene.image_path(camera)) {
            Ok(image) => image,
            Err(err) if err.kind == ImageReadError => {
                warn!("skipping camera '{}': {}", camera.label, err);
                report.skipped += 1;
                continue;
            }
            Err(err) => return Err(err),
        };

        let rendered = match render(
            &scene.mesh,
            &camera.to_render_camera(),
            real.dimensions(),
            &params.render_params,
        ) {
            Ok(image) => image,
            Err(err) if err.kind == RenderError => {
                warn!("failed to render camera '{}': {}", camera.label, err);
                report.failed += 1;
                continue;
            }
            Err(err) => return Err(err),
        };

        let pair = make_pair_image(&rendered, &real, params.real_image_gain);
        write_image(&pair_image_path(&params.vis_dir, camera.index), &pair)?;
        report.rendered += 1;
    }

    info!(
        "rendered {} views ({} skipped, {} failed)",
        report.rendered, report.skipped, report.failed
    );

    Ok(report)
}
