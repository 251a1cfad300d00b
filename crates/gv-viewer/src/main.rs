//! GV Viewer headless demo

use std::sync::Arc;

use glam::{Mat4, Vec3};
use gv_core::{ColorRgbRmo, MaterialInfo, MergePolicy, MeshGeometry, ModelId, SourceMesh};
use gv_renderer::{
    BatchBufferManager, Camera, GpuPickTarget, PickTarget, RenderContext, SoftwarePickTarget,
};
use gv_viewer::{MeasureTool, SharedViewerState, ViewerState, config::create_shared_config};
use parking_lot::Mutex;

const GRID: usize = 4;
const SPACING: f32 = 1.5;
const VIEWPORT: (u32, u32) = (1280, 720);

/// A `GRID` x `GRID` block of boxes offset along X.
fn box_grid(model: &ModelId, x_offset: f32, tint: [f32; 3]) -> Vec<SourceMesh> {
    let geometry = Arc::new(MeshGeometry::cuboid(Vec3::splat(0.5)));
    (0..GRID * GRID)
        .map(|i| {
            let (col, row) = ((i % GRID) as f32, (i / GRID) as f32);
            let center = Vec3::new(
                x_offset + (col - (GRID as f32 - 1.0) * 0.5) * SPACING,
                (row - (GRID as f32 - 1.0) * 0.5) * SPACING,
                0.0,
            );
            SourceMesh::new(model, format!("box_{}_{}", col, row), geometry.clone())
                .with_transform(Mat4::from_translation(center))
                .with_material(MaterialInfo {
                    base_color: tint,
                    ..MaterialInfo::default()
                })
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gv_viewer=debug,gv_renderer=debug,gv_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting GV Viewer demo");

    let config = create_shared_config();
    let shared: SharedViewerState =
        Arc::new(Mutex::new(ViewerState::from_config(config.read().config())));
    let mut viewer = shared.lock();

    if viewer.batching().merge_policy == Some(MergePolicy::OrientedBoundingBox) {
        tracing::warn!("Configured merge policy is not available, using per-model batches");
        viewer.set_merge_policy(Some(MergePolicy::Model))?;
    }

    let left = ModelId::new("left");
    let right = ModelId::new("right");
    let left_ids = viewer.add_model(&left, box_grid(&left, -4.0, [0.85, 0.35, 0.2]))?;
    let right_ids = viewer.add_model(&right, box_grid(&right, 4.0, [0.2, 0.45, 0.85]))?;

    pollster::block_on(viewer.rebuild_batches())?;
    tracing::info!(
        "Built {} batches for {} meshes",
        viewer.registry().group_count(),
        viewer.scene().len()
    );

    viewer.select(&left_ids[..2]);
    viewer.isolate(&left_ids);
    viewer.color_with(&right_ids[..1], ColorRgbRmo::new(0.1, 0.9, 0.3, 0.6, 0.0, 1.0));
    let report = viewer.prepare_frame();
    tracing::info!(
        "Frame prepared: {} color updates, {} opacity changes",
        report.updated.len(),
        report.opacity_changed.len()
    );

    for event in viewer.drain_events() {
        tracing::debug!("Event: {:?}", event);
    }

    let (width, height) = VIEWPORT;
    let mut camera =
        Camera::new(width as f32 / height as f32).looking_at(Vec3::new(-2.0, 1.0, 18.0), Vec3::new(-2.0, 0.0, 0.0));

    // `--gpu` renders the pick pass and uploads batches through wgpu when an adapter exists.
    let gpu = if std::env::args().any(|arg| arg == "--gpu") {
        let ctx = pollster::block_on(RenderContext::headless());
        if ctx.is_none() {
            tracing::warn!("No GPU adapter available, falling back to software picking");
        }
        ctx
    } else {
        None
    };

    let mut target: Box<dyn PickTarget> = match &gpu {
        Some(ctx) => {
            let mut buffers = BatchBufferManager::new();
            let stats = buffers.sync(ctx, viewer.registry_mut());
            tracing::info!("Uploaded {} batches to the GPU", stats.created);
            Box::new(GpuPickTarget::new(ctx))
        }
        None => Box::new(SoftwarePickTarget::new()),
    };
    let mut measure = MeasureTool::new();
    measure.set_active(true);

    let probes = [
        (width as f32 * 0.5, height as f32 * 0.5),
        (width as f32 * 0.3, height as f32 * 0.4),
    ];
    for (x, y) in probes {
        match viewer.pick(&mut camera, width, height, x, y, target.as_mut())? {
            Some(hit) => {
                tracing::info!("Picked {} at ({}, {}), snap {:?}", hit.mesh, x, y, hit.snap);
                viewer.highlight(Some(&hit.mesh));
                if let Some(point) = hit.snap
                    && let Some(measurement) = measure.handle_point(point)
                {
                    tracing::info!(
                        "Distance between snapped vertices: {:.3}",
                        measurement.distance
                    );
                }
            }
            None => tracing::info!("Nothing under ({}, {})", x, y),
        }
    }

    viewer.prepare_frame();
    tracing::info!("Selected meshes: {:?}", viewer.selected_meshes());
    Ok(())
}
