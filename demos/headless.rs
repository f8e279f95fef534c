//! Splats a ring of points in a headless Bevy app and prints the middle Z slice.

use std::sync::Arc;

use bevy::{app::AppExit, log::LogPlugin, prelude::*};
use point_splat_sdf::{
    DistanceFieldPlugin, DistanceTransformConfig, GridGeometry, PointCloud,
    plugin::{DistanceField, PointSplat},
    types::Point,
};

const RESOLUTION: usize = 24;

fn main() {
    App::new()
        .add_plugins((
            MinimalPlugins,
            LogPlugin::default(),
            DistanceFieldPlugin::default(),
        ))
        .add_systems(Startup, setup)
        .add_systems(Update, print_when_ready)
        .run();
}

fn setup(mut commands: Commands) {
    let cloud: PointCloud = (0..64)
        .map(|i| {
            let angle = i as f64 / 64. * std::f64::consts::TAU;
            Point::new(0.6 * angle.cos(), 0.6 * angle.sin(), 0.)
        })
        .collect();

    let voxel_size = 2. / RESOLUTION as f64;
    let geometry = GridGeometry::from_origin(
        Point::new(-1., -1., -1.),
        [RESOLUTION, RESOLUTION, RESOLUTION],
        voxel_size,
    )
    .expect("valid grid");

    commands.spawn(
        PointSplat::new(Arc::new(cloud), geometry).with_config(
            DistanceTransformConfig::default()
                .with_max_distance(3. * voxel_size)
                .with_subvoxel_resolution(10),
        ),
    );
}

fn print_when_ready(
    query: Query<&DistanceField, Added<DistanceField>>,
    mut exit: MessageWriter<AppExit>,
) {
    for field in query.iter() {
        println!("{}", field.format_slice(RESOLUTION / 2));
        exit.write(AppExit::Success);
    }
}
