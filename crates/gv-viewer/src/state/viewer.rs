//! Viewer orchestration.
//!
//! `ViewerState` owns the loaded meshes and every piece of state derived
//! from them, and is the only place that mutates visual tags. Each tag
//! change queues the affected meshes on the batch registry; the renderer
//! calls [`ViewerState::prepare_frame`] once per frame to push those colors
//! into the batches.

use std::collections::HashSet;

use glam::Vec3;
use gv_core::{
    BatchConfig, ColorRgbRmo, ColorSettings, MergePolicy, MeshId, ModelId, Result, SceneMeshes,
    SourceMesh, ViewerError, VisualTags,
};
use gv_renderer::{
    BatchBuilder, BatchMode, Camera, ColorState, FlushReport, PickError, PickTarget, PickingIndex,
    RenderBatchRegistry, build_batch_mode, canvas_to_ndc,
};

use crate::config::AppConfig;

/// Notification for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    ModelAdded(ModelId),
    ModelRemoved(ModelId),
    /// Meshes whose selected tag flipped.
    SelectionChanged(Vec<MeshId>),
    /// Meshes whose isolated tag flipped.
    IsolationChanged(Vec<MeshId>),
    HighlightChanged(Option<MeshId>),
    /// Meshes whose custom color was set or cleared.
    ColorChanged(Vec<MeshId>),
    BatchesRebuilt { groups: usize },
}

/// Result of a pick: the mesh under the pixel and the snapped vertex, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct PickHit {
    pub mesh: MeshId,
    pub snap: Option<Vec3>,
}

/// A batch rebuild detached from the viewer.
///
/// Works on snapshots of the scene and the color table so the viewer stays
/// usable while the build is suspended between chunks.
pub struct RebuildJob {
    scene: SceneMeshes,
    colors: ColorState,
    policy: Option<MergePolicy>,
    model_plus_max_meshes: usize,
    builder: BatchBuilder,
    color_epoch: u64,
}

impl RebuildJob {
    /// Groups and builds every batch.
    pub async fn run(mut self) -> Result<BuiltBatches> {
        let mode = build_batch_mode(
            self.policy,
            self.model_plus_max_meshes,
            &self.scene,
            &mut self.colors,
            &self.builder,
        )
        .await?;

        Ok(BuiltBatches {
            mode,
            revision: self.scene.revision(),
            colors: self.colors,
            color_epoch: self.color_epoch,
        })
    }
}

/// Output of a finished [`RebuildJob`], ready to install.
pub struct BuiltBatches {
    mode: BatchMode,
    revision: u64,
    colors: ColorState,
    color_epoch: u64,
}

/// Loaded meshes, their visual state, batches and picking proxies.
pub struct ViewerState {
    scene: SceneMeshes,
    colors: ColorState,
    registry: RenderBatchRegistry,
    picking: PickingIndex,
    builder: BatchBuilder,
    batching: BatchConfig,
    needs_rebuild: bool,
    /// Meshes removed since the last rebuild started.
    removed_since_build: Vec<MeshId>,
    /// Bumped on every tag, custom color or settings change.
    color_epoch: u64,
    /// Meshes kept in focus by the active isolation.
    isolation_focus: Option<HashSet<MeshId>>,
    highlighted: Option<MeshId>,
    events: Vec<ViewerEvent>,
}

impl ViewerState {
    pub fn new(colors: ColorSettings, batching: BatchConfig) -> Self {
        Self {
            scene: SceneMeshes::new(),
            colors: ColorState::new(colors),
            registry: RenderBatchRegistry::new(),
            picking: PickingIndex::new(),
            builder: BatchBuilder::new(batching.build_chunk_size),
            batching,
            needs_rebuild: false,
            removed_since_build: Vec::new(),
            color_epoch: 0,
            isolation_focus: None,
            highlighted: None,
            events: Vec::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.colors, config.batching.clone())
    }

    pub fn scene(&self) -> &SceneMeshes {
        &self.scene
    }

    pub fn colors(&self) -> &ColorState {
        &self.colors
    }

    pub fn registry(&self) -> &RenderBatchRegistry {
        &self.registry
    }

    /// Mutable registry access for the GPU upload step.
    pub fn registry_mut(&mut self) -> &mut RenderBatchRegistry {
        &mut self.registry
    }

    pub fn picking(&self) -> &PickingIndex {
        &self.picking
    }

    pub fn batching(&self) -> &BatchConfig {
        &self.batching
    }

    /// True when the batches no longer reflect the loaded meshes or policy.
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    /// Takes all pending events.
    pub fn drain_events(&mut self) -> Vec<ViewerEvent> {
        std::mem::take(&mut self.events)
    }

    // ========== Models ==========

    /// Loads a model's meshes and gives each a picking proxy.
    pub fn add_model(&mut self, model: &ModelId, meshes: Vec<SourceMesh>) -> Result<Vec<MeshId>> {
        let ids = self.scene.add_model(model, meshes)?;

        for id in &ids {
            let Some(mesh) = self.scene.get(id) else {
                continue;
            };
            if let Err(e) = self.picking.add(mesh) {
                tracing::warn!("Mesh {} is not pickable: {}", id, e);
            }
            // Meshes loaded during an isolation start out of focus.
            if self.isolation_focus.is_some() {
                self.colors.tags_mut(id).isolated = true;
            }
        }

        self.needs_rebuild = true;
        self.events.push(ViewerEvent::ModelAdded(model.clone()));
        tracing::info!("Added model {} ({} meshes)", model, ids.len());
        Ok(ids)
    }

    /// Unloads a model. Returns how many meshes were removed; unknown models remove nothing.
    pub fn remove_model(&mut self, model: &ModelId) -> usize {
        let Some(ids) = self.scene.model_meshes(model).map(|ids| ids.to_vec()) else {
            return 0;
        };

        self.registry.purge_meshes(&ids);
        for id in &ids {
            self.picking.remove(id);
            self.colors.remove(id);
            if let Some(focus) = self.isolation_focus.as_mut() {
                focus.remove(id);
            }
        }
        if self.highlighted.as_ref().is_some_and(|h| ids.contains(h)) {
            self.highlighted = None;
        }

        let removed = self.scene.remove_model(model).len();
        self.removed_since_build.extend(ids);
        self.needs_rebuild = true;
        self.events.push(ViewerEvent::ModelRemoved(model.clone()));
        tracing::info!("Removed model {} ({} meshes)", model, removed);
        removed
    }

    // ========== Visual state ==========

    /// Sets one tag on the given meshes. Returns the meshes whose tag flipped.
    fn set_tag(
        &mut self,
        ids: &[MeshId],
        value: bool,
        tag: fn(&mut VisualTags) -> &mut bool,
    ) -> Vec<MeshId> {
        let mut changed = Vec::new();
        for id in ids {
            if !self.scene.contains(id) {
                continue;
            }
            let flag = tag(self.colors.tags_mut(id));
            if *flag != value {
                *flag = value;
                self.registry.enqueue_color_update(id);
                changed.push(id.clone());
            }
        }
        if !changed.is_empty() {
            self.color_epoch += 1;
        }
        changed
    }

    fn meshes_with(&self, tag: fn(&VisualTags) -> bool) -> Vec<MeshId> {
        self.scene
            .mesh_ids()
            .filter(|id| tag(&self.colors.tags(id)))
            .cloned()
            .collect()
    }

    fn push_selection(&mut self, changed: Vec<MeshId>) {
        if !changed.is_empty() {
            self.events.push(ViewerEvent::SelectionChanged(changed));
        }
    }

    fn push_isolation(&mut self, changed: Vec<MeshId>) {
        if !changed.is_empty() {
            self.events.push(ViewerEvent::IsolationChanged(changed));
        }
    }

    pub fn select(&mut self, ids: &[MeshId]) {
        let changed = self.set_tag(ids, true, |t| &mut t.selected);
        self.push_selection(changed);
    }

    pub fn deselect(&mut self, ids: &[MeshId]) {
        let changed = self.set_tag(ids, false, |t| &mut t.selected);
        self.push_selection(changed);
    }

    /// Flips the selected tag of each mesh.
    pub fn toggle_select(&mut self, ids: &[MeshId]) {
        let (selected, unselected): (Vec<MeshId>, Vec<MeshId>) =
            ids.iter().cloned().partition(|id| self.colors.tags(id).selected);
        let mut changed = self.set_tag(&selected, false, |t| &mut t.selected);
        changed.extend(self.set_tag(&unselected, true, |t| &mut t.selected));
        self.push_selection(changed);
    }

    pub fn clear_selection(&mut self) {
        let selected = self.meshes_with(|t| t.selected);
        self.deselect(&selected);
    }

    /// Selected meshes in load order.
    pub fn selected_meshes(&self) -> Vec<MeshId> {
        self.meshes_with(|t| t.selected)
    }

    /// Keeps `ids` in focus and isolates every other loaded mesh.
    ///
    /// An empty or fully unknown id set clears the isolation.
    pub fn isolate(&mut self, ids: &[MeshId]) {
        let focus: HashSet<MeshId> = ids.iter().filter(|id| self.scene.contains(id)).cloned().collect();
        if focus.is_empty() {
            self.clear_isolation();
            return;
        }

        let (kept, others): (Vec<MeshId>, Vec<MeshId>) =
            self.scene.mesh_ids().cloned().partition(|id| focus.contains(id));
        let mut changed = self.set_tag(&kept, false, |t| &mut t.isolated);
        changed.extend(self.set_tag(&others, true, |t| &mut t.isolated));

        tracing::debug!("Isolated {} meshes, {} in focus", others.len(), focus.len());
        self.isolation_focus = Some(focus);
        self.push_isolation(changed);
    }

    pub fn clear_isolation(&mut self) {
        let isolated = self.meshes_with(|t| t.isolated);
        let changed = self.set_tag(&isolated, false, |t| &mut t.isolated);
        self.isolation_focus = None;
        self.push_isolation(changed);
    }

    pub fn is_isolating(&self) -> bool {
        self.isolation_focus.is_some()
    }

    /// Moves the single hover highlight. Unknown meshes clear it.
    pub fn highlight(&mut self, id: Option<&MeshId>) {
        let next = id.filter(|id| self.scene.contains(id)).cloned();
        if next == self.highlighted {
            return;
        }

        if let Some(previous) = self.highlighted.take() {
            self.set_tag(std::slice::from_ref(&previous), false, |t| &mut t.highlighted);
        }
        if let Some(current) = &next {
            self.set_tag(std::slice::from_ref(current), true, |t| &mut t.highlighted);
        }
        self.highlighted = next.clone();
        self.events.push(ViewerEvent::HighlightChanged(next));
    }

    pub fn highlighted(&self) -> Option<&MeshId> {
        self.highlighted.as_ref()
    }

    /// Applies a custom color to the given meshes.
    pub fn color_with(&mut self, ids: &[MeshId], color: ColorRgbRmo) {
        let mut changed = Vec::new();
        for id in ids.iter().filter(|id| self.scene.contains(id)) {
            self.colors.set_custom(id, color);
            self.colors.tags_mut(id).colored = true;
            self.registry.enqueue_color_update(id);
            changed.push(id.clone());
        }
        if !changed.is_empty() {
            self.color_epoch += 1;
            self.events.push(ViewerEvent::ColorChanged(changed));
        }
    }

    /// Removes custom colors from the given meshes.
    pub fn clear_color(&mut self, ids: &[MeshId]) {
        let mut changed = Vec::new();
        for id in ids {
            if !self.colors.tags(id).colored {
                continue;
            }
            // The custom slot goes first so no resolve sees `colored` without it.
            self.colors.clear_custom(id);
            self.colors.tags_mut(id).colored = false;
            self.registry.enqueue_color_update(id);
            changed.push(id.clone());
        }
        if !changed.is_empty() {
            self.color_epoch += 1;
            self.events.push(ViewerEvent::ColorChanged(changed));
        }
    }

    /// Replaces the global colors and re-resolves every tagged mesh.
    pub fn set_color_settings(&mut self, settings: ColorSettings) {
        if *self.colors.settings() == settings {
            return;
        }
        for id in self.colors.set_settings(settings) {
            self.registry.enqueue_color_update(&id);
        }
        self.color_epoch += 1;
    }

    /// Currently displayed color of a mesh.
    pub fn displayed_color(&self, id: &MeshId) -> Result<ColorRgbRmo> {
        let mesh = self
            .scene
            .get(id)
            .ok_or_else(|| ViewerError::UnknownMesh(id.clone()))?;
        Ok(self
            .colors
            .computed(id)
            .unwrap_or_else(|| mesh.material.map(ColorRgbRmo::from).unwrap_or_default()))
    }

    // ========== Batches ==========

    /// Changes the merge policy. The oriented-bounding-box policy is rejected.
    pub fn set_merge_policy(&mut self, policy: Option<MergePolicy>) -> Result<()> {
        if policy == Some(MergePolicy::OrientedBoundingBox) {
            return Err(ViewerError::UnsupportedMergePolicy(MergePolicy::OrientedBoundingBox));
        }
        if policy != self.batching.merge_policy {
            tracing::info!(
                "Merge policy: {} -> {}",
                self.batching.merge_policy.map_or("none", |p| p.name()),
                policy.map_or("none", |p| p.name())
            );
            self.batching.merge_policy = policy;
            self.needs_rebuild = true;
        }
        Ok(())
    }

    /// Snapshots the current state into a detached rebuild.
    pub fn begin_rebuild(&mut self) -> RebuildJob {
        self.removed_since_build.clear();
        RebuildJob {
            scene: self.scene.clone(),
            colors: self.colors.clone(),
            policy: self.batching.merge_policy,
            model_plus_max_meshes: self.batching.model_plus_max_meshes,
            builder: self.builder.clone(),
            color_epoch: self.color_epoch,
        }
    }

    /// Installs a finished rebuild in one step.
    ///
    /// If meshes were loaded or unloaded while it ran, the rebuild flag stays set.
    pub fn finish_rebuild(&mut self, built: BuiltBatches) {
        self.registry.install(built.mode);
        for id in std::mem::take(&mut self.removed_since_build) {
            self.registry.purge_mesh(&id);
        }

        if built.color_epoch == self.color_epoch && built.revision == self.scene.revision() {
            self.colors = built.colors;
        } else {
            // The new batches carry the snapshot's colors; queue every mesh the
            // live table resolves differently.
            let stale: Vec<MeshId> = self
                .scene
                .mesh_ids()
                .filter(|id| {
                    built.colors.computed(id) != self.colors.computed(id)
                        || built.colors.tags(id) != self.colors.tags(id)
                })
                .cloned()
                .collect();
            tracing::debug!("Requeueing {} meshes colored by a stale snapshot", stale.len());
            for id in &stale {
                self.registry.enqueue_color_update(id);
            }
        }

        self.needs_rebuild = built.revision != self.scene.revision();
        if self.needs_rebuild {
            tracing::debug!("Scene changed during rebuild, another rebuild is due");
        }
        self.events.push(ViewerEvent::BatchesRebuilt {
            groups: self.registry.group_count(),
        });
    }

    /// Rebuilds all batches from the current scene and installs them.
    pub async fn rebuild_batches(&mut self) -> Result<()> {
        let job = self.begin_rebuild();
        let built = job.run().await?;
        self.finish_rebuild(built);
        Ok(())
    }

    /// Flushes queued color updates and re-sorts batches. Call once per frame.
    pub fn prepare_frame(&mut self) -> FlushReport {
        self.registry.prepare_frame(&self.scene, &mut self.colors)
    }

    // ========== Picking ==========

    /// Resolves the mesh under a canvas pixel and snaps to its dominant vertex.
    pub fn pick(
        &self,
        camera: &mut Camera,
        width: u32,
        height: u32,
        x: f32,
        y: f32,
        target: &mut dyn PickTarget,
    ) -> std::result::Result<Option<PickHit>, PickError> {
        let Some(mesh) = self.picking.mesh_at(camera, width, height, x, y, target)? else {
            return Ok(None);
        };

        let ndc = canvas_to_ndc(x + 0.5, y + 0.5, width as f32, height as f32);
        let snap = self.picking.snap_point_at(camera, ndc, &mesh);
        Ok(Some(PickHit { mesh, snap }))
    }
}

impl Default for ViewerState {
    fn default() -> Self {
        Self::new(ColorSettings::default(), BatchConfig::default())
    }
}
