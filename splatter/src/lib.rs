// This file makes `splatter` into a rust library crate.

// The file `main.rs` still exists to make `splatter` into an executable.

pub mod aggregate_colors;
pub mod aggregation;
pub mod camera;
pub mod masked;
pub mod mesh;
pub mod misc;
pub mod ply;
pub mod projection;
pub mod render;
pub mod render_views;
pub mod run;
pub mod scene;
pub mod visualize;

pub use base;
