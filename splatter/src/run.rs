use structopt::StructOpt;

use crate::aggregate_colors::{
    aggregate_colors_with_params, AggregateColorsParams,
};
use crate::render_views::{render_views_to_files, RenderViewsParams};
use crate::scene::{Scene, SceneParams};
use base::defs::Result;

#[derive(StructOpt)]
#[structopt(about = "Render views, then aggregate per-vertex colors")]
pub struct RunCommand {
    #[structopt(flatten)]
    scene_params: SceneParams,

    #[structopt(flatten)]
    render_params: RenderViewsParams,

    #[structopt(flatten)]
    aggregate_params: AggregateColorsParams,
}

impl RunCommand {
    pub fn run(&self) -> Result<()> {
        let scene = Scene::load(&self.scene_params)?;
        render_views_to_files(&scene, &self.render_params)?;
        aggregate_colors_with_params(&scene, &self.aggregate_params)?;
        Ok(())
    }
}
