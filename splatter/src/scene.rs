use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use crate::camera::{Camera, CameraSet};
use crate::mesh::{Mesh, MeshParams};
use base::defs::Result;

#[derive(Clone, Debug, StructOpt)]
pub struct SceneParams {
    #[structopt(
        help = "Input colored mesh .ply file",
        long,
        default_value = "data/mesh.ply"
    )]
    pub mesh_file: PathBuf,

    #[structopt(
        help = "Camera calibration .json file (sensors and cameras \
                layout, not a raw Metashape .xml export)",
        long,
        default_value = "data/cameras.json"
    )]
    pub camera_file: PathBuf,

    #[structopt(
        help = "Folder with camera images",
        long,
        default_value = "data/images"
    )]
    pub image_folder: PathBuf,

    #[structopt(
        help = "Decimated mesh cache .ply file",
        long,
        default_value = "data/decimated.ply"
    )]
    pub decimated_mesh: PathBuf,

    #[structopt(
        help = "Reuse the decimated mesh cache instead of decimating",
        long
    )]
    pub reload: bool,

    #[structopt(help = "Use at most this many cameras", long)]
    pub max_cameras: Option<usize>,

    #[structopt(flatten)]
    pub mesh_params: MeshParams,
}

impl Default for SceneParams {
    fn default() -> Self {
        Self {
            mesh_file: PathBuf::from("data/mesh.ply"),
            camera_file: PathBuf::from("data/cameras.json"),
            image_folder: PathBuf::from("data/images"),
            decimated_mesh: PathBuf::from("data/decimated.ply"),
            reload: false,
            max_cameras: None,
            mesh_params: MeshParams::default(),
        }
    }
}

/// Mesh and cameras in one world scale, loaded once per session.
#[derive(Clone, Debug)]
pub struct Scene {
    pub mesh: Mesh,
    pub cameras: CameraSet,
    pub image_folder: PathBuf,
}

impl Scene {
    pub fn load(params: &SceneParams) -> Result<Scene> {
        let mut cameras = CameraSet::load(&params.camera_file)?;
        if let Some(max_cameras) = params.max_cameras {
            cameras.truncate(max_cameras);
        }
        cameras.rescale(params.mesh_params.scale_factor);

        let mut mesh = Mesh::load_or_reload(
            &params.mesh_file,
            &params.decimated_mesh,
            params.reload,
            &params.mesh_params,
        )?;
        mesh.apply_brightness(params.mesh_params.brightness);

        info!(
            "scene has {} vertices, {} faces and {} cameras",
            mesh.vertices.len(),
            mesh.faces.len(),
            cameras.len()
        );

        Ok(Scene {
            mesh,
            cameras,
            image_folder: params.image_folder.clone(),
        })
    }

    pub fn image_path(&self, camera: &Camera) -> PathBuf {
        self.image_folder.join(&camera.filename)
    }
}
