use std::sync::Arc;

use bevy::{
    prelude::*,
    tasks::{AsyncComputeTaskPool, Task, block_on, futures_lite::future},
};

use crate::{
    error::Result,
    geometry::GridGeometry,
    grid::DistanceGrid,
    point_cloud::PointCloud,
    transform::{DistanceToPointSet, DistanceTransformConfig, InsideTester},
};

/// System sets for the distance field pipeline.
///
/// Use these to order your own systems relative to field generation:
///
/// ```rust,ignore
/// // Run once fields are ready, e.g. to hand them to a mesher:
/// app.add_systems(Update, extract_surface.after(DistanceFieldSet::Generate));
/// ```
///
/// ```text
/// DistanceFieldSet::Spawn  →  [async compute]  →  DistanceFieldSet::Generate  →  [your systems]
/// ```
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum DistanceFieldSet {
    /// Queues changed [`PointSplat`]s and spawns an async compute task for each queued one.
    Spawn,
    /// Polls async tasks and inserts [`DistanceField`] on completion.
    Generate,
}

/// Point cloud, grid and transform settings to turn into a [`DistanceField`].
///
/// The cloud is held in an [`Arc`] so the async task can read it without a copy.
/// With an `inside_tester` the field is signed: inside cells get negative codes.
#[derive(Component, Clone)]
pub struct PointSplat {
    pub cloud: Arc<PointCloud>,
    pub geometry: GridGeometry,
    pub config: DistanceTransformConfig,
    pub inside_tester: Option<Arc<dyn InsideTester>>,
}

impl PointSplat {
    pub fn new(cloud: Arc<PointCloud>, geometry: GridGeometry) -> Self {
        Self {
            cloud,
            geometry,
            config: DistanceTransformConfig::default(),
            inside_tester: None,
        }
    }

    pub fn with_config(mut self, config: DistanceTransformConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_inside_tester(mut self, tester: impl InsideTester + 'static) -> Self {
        self.inside_tester = Some(Arc::new(tester));
        self
    }

    /// Builds the transform and splats into a fresh grid.
    fn run(self) -> Result<DistanceGrid> {
        let mut transform = DistanceToPointSet::new(self.cloud, self.config)?;
        if let Some(tester) = self.inside_tester {
            transform = transform.with_shared_inside_tester(tester);
        }
        let mut grid = DistanceGrid::new(self.geometry);
        transform.execute(&mut grid)?;
        Ok(grid)
    }
}

/// Marker component added to [`PointSplat`] entities that are waiting to be processed.
///
/// Removed once the field has been generated (or has failed).
#[derive(Component)]
pub struct QueuedSplat;

/// Holds the in-flight async compute task for a [`PointSplat`].
#[derive(Component)]
pub struct SplatTask(Task<Result<DistanceGrid>>);

/// The populated distance grid for a [`PointSplat`] entity.
#[derive(Component, Deref)]
pub struct DistanceField(pub DistanceGrid);

/// Inserted instead of [`DistanceField`] when a run fails, with the error message.
#[derive(Component, Debug)]
pub struct DistanceFieldFailed(pub String);

/// Runtime configuration for the distance field pipeline.
#[derive(Resource)]
pub struct DistanceFieldConfig {
    /// Maximum number of async splat tasks spawned per frame. Default: `2`.
    pub max_tasks_per_frame: usize,
}

impl Default for DistanceFieldConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_frame: 2,
        }
    }
}

/// Bevy plugin that turns [`PointSplat`] components into [`DistanceField`]s.
///
/// With the `auto_queue` feature any added or changed [`PointSplat`] is processed
/// automatically; without it, insert [`QueuedSplat`] yourself.
///
/// ```text
/// PointSplat added / changed
///   → QueuedSplat inserted, stale results dropped   (queue_changed_splats)
///   → SplatTask spawned                              (DistanceFieldSet::Spawn)
///   → [async compute runs]
///   → DistanceField or DistanceFieldFailed inserted  (DistanceFieldSet::Generate)
///   → QueuedSplat + SplatTask removed
/// ```
pub struct DistanceFieldPlugin {
    /// Initial value for [`DistanceFieldConfig::max_tasks_per_frame`].
    pub max_tasks_per_frame: usize,
}

impl Default for DistanceFieldPlugin {
    fn default() -> Self {
        Self {
            max_tasks_per_frame: DistanceFieldConfig::default().max_tasks_per_frame,
        }
    }
}

impl Plugin for DistanceFieldPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(DistanceFieldConfig {
            max_tasks_per_frame: self.max_tasks_per_frame,
        })
        .configure_sets(
            Update,
            (DistanceFieldSet::Spawn, DistanceFieldSet::Generate).chain(),
        )
        .add_systems(
            Update,
            (
                spawn_splat_tasks.in_set(DistanceFieldSet::Spawn),
                poll_splat_tasks.in_set(DistanceFieldSet::Generate),
            ),
        );

        #[cfg(feature = "auto_queue")]
        app.add_systems(
            Update,
            queue_changed_splats
                .before(spawn_splat_tasks)
                .in_set(DistanceFieldSet::Spawn),
        );
    }
}

/// Queues every added or changed [`PointSplat`] and drops results computed from old data.
///
/// Removing [`SplatTask`] drops the task, which cancels it.
#[cfg(feature = "auto_queue")]
fn queue_changed_splats(mut commands: Commands, query: Query<Entity, Changed<PointSplat>>) {
    for entity in query.iter() {
        commands
            .entity(entity)
            .insert(QueuedSplat)
            .remove::<(SplatTask, DistanceField, DistanceFieldFailed)>();
    }
}

/// Spawns async compute tasks for [`QueuedSplat`]s, up to
/// [`DistanceFieldConfig::max_tasks_per_frame`] per frame.
fn spawn_splat_tasks(
    mut commands: Commands,
    config: Res<DistanceFieldConfig>,
    query: Query<(Entity, &PointSplat), (With<QueuedSplat>, Without<SplatTask>)>,
) {
    let task_pool = AsyncComputeTaskPool::get();

    for (entity, splat) in query.iter().take(config.max_tasks_per_frame) {
        let splat = splat.clone();
        let task = task_pool.spawn(async move { splat.run() });

        commands.entity(entity).insert(SplatTask(task));
    }
}

/// Polls in-flight [`SplatTask`]s each frame and inserts the result on completion.
///
/// Non-blocking: tasks that haven't finished are skipped and retried next frame.
fn poll_splat_tasks(mut commands: Commands, mut query: Query<(Entity, &mut SplatTask)>) {
    for (entity, mut task) in query.iter_mut() {
        let Some(result) = block_on(future::poll_once(&mut task.0)) else {
            continue;
        };

        let mut entity_commands = commands.entity(entity);
        entity_commands.remove::<(SplatTask, QueuedSplat)>();
        match result {
            Ok(grid) => {
                tracing::debug!(?entity, in_band = grid.in_band_count(), "distance field ready");
                entity_commands.insert(DistanceField(grid));
            }
            Err(err) => {
                tracing::warn!(?entity, %err, "distance field failed");
                entity_commands.insert(DistanceFieldFailed(err.to_string()));
            }
        }
    }
}
