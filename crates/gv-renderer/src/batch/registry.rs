//! Bookkeeping between source meshes and render batches.

use std::collections::{BTreeSet, HashMap, HashSet};

use gv_core::{ColorRgbRmo, MergePolicy, MeshId, Result, SceneMeshes};

use super::{BatchBuilder, MergeGroup, RenderGeometry, group_meshes};
use crate::color_state::ColorState;

/// Handle to a shared material in the unmerged material cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialHandle(u32);

impl MaterialHandle {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Deduplicating store of per-color materials.
///
/// Identical colors (by their `r|g|b|roughness|metalness|opacity` key)
/// share one material. Materials are reference counted by their users and
/// dropped when the last user releases them; freed handles are reused.
#[derive(Debug, Default)]
pub struct MaterialCache {
    by_key: HashMap<String, MaterialHandle>,
    slots: Vec<Option<MaterialSlot>>,
    free: Vec<u32>,
}

#[derive(Debug)]
struct MaterialSlot {
    color: ColorRgbRmo,
    key: String,
    users: u32,
}

impl MaterialCache {
    /// Returns the material for a color, creating it on first use.
    pub fn get_or_insert(&mut self, color: ColorRgbRmo) -> MaterialHandle {
        let key = color.cache_key();
        if let Some(&handle) = self.by_key.get(&key) {
            if let Some(slot) = self.slots[handle.0 as usize].as_mut() {
                slot.users += 1;
            }
            return handle;
        }

        let slot = MaterialSlot {
            color,
            key: key.clone(),
            users: 1,
        };
        let handle = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                MaterialHandle(index)
            }
            None => {
                self.slots.push(Some(slot));
                MaterialHandle(self.slots.len() as u32 - 1)
            }
        };
        self.by_key.insert(key, handle);
        handle
    }

    /// Drops one user of a material, evicting it when none remain.
    pub fn release(&mut self, handle: MaterialHandle) {
        let Some(Some(slot)) = self.slots.get_mut(handle.0 as usize) else {
            return;
        };
        slot.users -= 1;
        if slot.users == 0 {
            self.by_key.remove(&slot.key);
            self.slots[handle.0 as usize] = None;
            self.free.push(handle.0);
        }
    }

    pub fn get(&self, handle: MaterialHandle) -> Option<ColorRgbRmo> {
        self.slots
            .get(handle.0 as usize)
            .and_then(|slot| slot.as_ref())
            .map(|slot| slot.color)
    }

    /// Number of live materials.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Merged batches: groups, their geometry and the mesh-to-group map.
#[derive(Debug, Default)]
pub struct MergedBatches {
    groups: Vec<MergeGroup>,
    geometries: Vec<Option<RenderGeometry>>,
    mesh_to_group: HashMap<MeshId, usize>,
}

impl MergedBatches {
    /// Pairs groups with their built geometry (None for empty groups).
    pub fn new(groups: Vec<MergeGroup>, geometries: Vec<Option<RenderGeometry>>) -> Self {
        debug_assert_eq!(groups.len(), geometries.len());
        let mesh_to_group = groups
            .iter()
            .enumerate()
            .flat_map(|(index, group)| group.meshes.iter().map(move |id| (id.clone(), index)))
            .collect();
        Self {
            groups,
            geometries,
            mesh_to_group,
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Individually drawn meshes, each pointing at a shared material.
#[derive(Debug, Default)]
pub struct UnmergedMaterials {
    cache: MaterialCache,
    assignments: HashMap<MeshId, MaterialHandle>,
}

impl UnmergedMaterials {
    pub fn cache(&self) -> &MaterialCache {
        &self.cache
    }

    /// Points a mesh at the material for `color`, releasing its previous one.
    pub fn assign(&mut self, id: MeshId, color: ColorRgbRmo) -> MaterialHandle {
        let handle = self.cache.get_or_insert(color);
        if let Some(previous) = self.assignments.insert(id, handle) {
            self.cache.release(previous);
        }
        handle
    }

    /// Detaches a mesh from its material. Unknown meshes are a no-op.
    pub fn unassign(&mut self, id: &MeshId) {
        if let Some(handle) = self.assignments.remove(id) {
            self.cache.release(handle);
        }
    }
}

/// How color updates reach the screen.
#[derive(Debug)]
pub enum BatchMode {
    /// Colors are written into merged vertex buffers.
    Merged(MergedBatches),
    /// Each mesh swaps to a shared per-color material.
    Unmerged(UnmergedMaterials),
}

impl Default for BatchMode {
    fn default() -> Self {
        BatchMode::Merged(MergedBatches::default())
    }
}

/// Outcome of [`RenderBatchRegistry::flush_color_updates`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FlushReport {
    /// Meshes whose colors were written.
    pub updated: Vec<MeshId>,
    /// Meshes whose opacity changed with this flush.
    pub opacity_changed: Vec<MeshId>,
    /// Dirty meshes that no longer belong to any batch.
    pub skipped: usize,
}

/// Builds the batch set for a policy from the current scene state.
///
/// `None` produces the unmerged mode with every mesh assigned its resolved
/// material.
pub async fn build_batch_mode(
    policy: Option<MergePolicy>,
    model_plus_max_meshes: usize,
    scene: &SceneMeshes,
    colors: &mut ColorState,
    builder: &BatchBuilder,
) -> Result<BatchMode> {
    let groups = group_meshes(scene, policy, model_plus_max_meshes)?;

    if policy.is_none() {
        let mut unmerged = UnmergedMaterials::default();
        for id in scene.mesh_ids() {
            if let Some(mesh) = scene.get(id) {
                let color = colors.resolve(mesh).color;
                unmerged.assign(id.clone(), color);
            }
        }
        return Ok(BatchMode::Unmerged(unmerged));
    }

    let geometries = builder.build_groups(&groups, scene, colors).await;
    Ok(BatchMode::Merged(MergedBatches::new(groups, geometries)))
}

/// Keeps render batches in sync with per-mesh colors.
///
/// Color changes are queued with [`enqueue_color_update`](Self::enqueue_color_update)
/// and applied once per frame by [`prepare_frame`](Self::prepare_frame),
/// which writes the new colors and then re-sorts the index buffers of
/// groups whose opacity changed.
#[derive(Debug, Default)]
pub struct RenderBatchRegistry {
    mode: BatchMode,
    dirty: Vec<MeshId>,
    dirty_set: HashSet<MeshId>,
    resort: BTreeSet<usize>,
    generation: u64,
}

impl RenderBatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> &BatchMode {
        &self.mode
    }

    pub fn is_merged(&self) -> bool {
        matches!(self.mode, BatchMode::Merged(_))
    }

    /// Incremented by every [`install`](Self::install).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the whole batch set at once.
    ///
    /// Groups that already contain transparent meshes are queued for an
    /// opaque-first sort.
    pub fn install(&mut self, mode: BatchMode) {
        self.resort.clear();
        match &mode {
            BatchMode::Merged(merged) => {
                for (index, geometry) in merged.geometries.iter().enumerate() {
                    if geometry.as_ref().is_some_and(|g| g.has_transparent()) {
                        self.resort.insert(index);
                    }
                }
                tracing::info!(
                    "Installed {} merged batches ({} vertices)",
                    merged.len(),
                    merged
                        .geometries
                        .iter()
                        .flatten()
                        .map(|g| g.vertex_count())
                        .sum::<usize>()
                );
            }
            BatchMode::Unmerged(unmerged) => {
                tracing::info!(
                    "Installed {} unmerged meshes sharing {} materials",
                    unmerged.assignments.len(),
                    unmerged.cache.len()
                );
            }
        }
        self.mode = mode;
        self.generation += 1;
    }

    /// Queues a mesh for color refresh on the next flush.
    pub fn enqueue_color_update(&mut self, id: &MeshId) {
        if self.dirty_set.insert(id.clone()) {
            self.dirty.push(id.clone());
        }
    }

    pub fn pending_updates(&self) -> usize {
        self.dirty.len()
    }

    /// Re-resolves every queued mesh and writes its color into its batch.
    pub fn flush_color_updates(&mut self, scene: &SceneMeshes, colors: &mut ColorState) -> FlushReport {
        let dirty = std::mem::take(&mut self.dirty);
        self.dirty_set.clear();

        let mut report = FlushReport::default();
        for id in dirty {
            let Some(mesh) = scene.get(&id) else {
                report.skipped += 1;
                continue;
            };

            match &mut self.mode {
                BatchMode::Merged(merged) => {
                    let Some(&group) = merged.mesh_to_group.get(&id) else {
                        report.skipped += 1;
                        continue;
                    };
                    let resolved = colors.resolve(mesh);
                    let mut partition_moved = false;
                    if let Some(geometry) = merged.geometries[group].as_mut() {
                        let was_opaque = geometry.slice(&id).map(|s| s.opaque);
                        geometry.write_color(&id, resolved.color);
                        // The batch may hold a color from an older state than `colors`.
                        partition_moved = was_opaque.is_some_and(|o| o != resolved.color.is_opaque());
                    }
                    if resolved.opacity_changed || partition_moved {
                        self.resort.insert(group);
                    }
                    if resolved.opacity_changed {
                        report.opacity_changed.push(id.clone());
                    }
                }
                BatchMode::Unmerged(unmerged) => {
                    if !unmerged.assignments.contains_key(&id) {
                        report.skipped += 1;
                        continue;
                    }
                    let resolved = colors.resolve(mesh);
                    unmerged.assign(id.clone(), resolved.color);
                    if resolved.opacity_changed {
                        report.opacity_changed.push(id.clone());
                    }
                }
            }
            report.updated.push(id);
        }

        if !report.updated.is_empty() {
            tracing::trace!(
                "Flushed {} color updates ({} opacity changes, {} skipped)",
                report.updated.len(),
                report.opacity_changed.len(),
                report.skipped
            );
        }
        report
    }

    /// Groups waiting for an opaque-first sort.
    pub fn pending_resorts(&self) -> Vec<usize> {
        self.resort.iter().copied().collect()
    }

    /// Reorders one group's index buffer so opaque meshes come first.
    pub fn sort_opaque_first(&mut self, group: usize) {
        self.resort.remove(&group);
        if let BatchMode::Merged(merged) = &mut self.mode
            && let Some(Some(geometry)) = merged.geometries.get_mut(group)
        {
            geometry.sort_opaque_first();
        }
    }

    /// Sorts every group flagged by earlier flushes. Returns how many were sorted.
    pub fn sort_pending(&mut self) -> usize {
        let pending = std::mem::take(&mut self.resort);
        let count = pending.len();
        for group in pending {
            self.sort_opaque_first(group);
        }
        count
    }

    /// Flushes queued color updates, then sorts flagged groups. Call once per frame.
    pub fn prepare_frame(&mut self, scene: &SceneMeshes, colors: &mut ColorState) -> FlushReport {
        let report = self.flush_color_updates(scene, colors);
        self.sort_pending();
        report
    }

    /// Forgets a mesh. Unknown meshes are a no-op.
    ///
    /// Its vertices stay in the merged geometry until the next rebuild.
    pub fn purge_mesh(&mut self, id: &MeshId) {
        if self.dirty_set.remove(id) {
            self.dirty.retain(|d| d != id);
        }
        match &mut self.mode {
            BatchMode::Merged(merged) => {
                if let Some(group) = merged.mesh_to_group.remove(id) {
                    merged.groups[group].meshes.retain(|m| m != id);
                }
            }
            BatchMode::Unmerged(unmerged) => unmerged.unassign(id),
        }
    }

    /// Forgets every mesh of a removed model.
    pub fn purge_meshes<'a>(&mut self, ids: impl IntoIterator<Item = &'a MeshId>) {
        for id in ids {
            self.purge_mesh(id);
        }
    }

    /// Number of merge groups (0 when unmerged).
    pub fn group_count(&self) -> usize {
        match &self.mode {
            BatchMode::Merged(merged) => merged.len(),
            BatchMode::Unmerged(_) => 0,
        }
    }

    pub fn group_of(&self, id: &MeshId) -> Option<usize> {
        match &self.mode {
            BatchMode::Merged(merged) => merged.mesh_to_group.get(id).copied(),
            BatchMode::Unmerged(_) => None,
        }
    }

    pub fn group_meshes(&self, group: usize) -> &[MeshId] {
        match &self.mode {
            BatchMode::Merged(merged) => merged
                .groups
                .get(group)
                .map(|g| g.meshes.as_slice())
                .unwrap_or(&[]),
            BatchMode::Unmerged(_) => &[],
        }
    }

    pub fn geometry(&self, group: usize) -> Option<&RenderGeometry> {
        match &self.mode {
            BatchMode::Merged(merged) => merged.geometries.get(group).and_then(|g| g.as_ref()),
            BatchMode::Unmerged(_) => None,
        }
    }

    pub fn geometry_mut(&mut self, group: usize) -> Option<&mut RenderGeometry> {
        match &mut self.mode {
            BatchMode::Merged(merged) => merged.geometries.get_mut(group).and_then(|g| g.as_mut()),
            BatchMode::Unmerged(_) => None,
        }
    }

    /// Material assigned to an individually drawn mesh.
    pub fn material_of(&self, id: &MeshId) -> Option<(MaterialHandle, ColorRgbRmo)> {
        match &self.mode {
            BatchMode::Merged(_) => None,
            BatchMode::Unmerged(unmerged) => {
                let handle = *unmerged.assignments.get(id)?;
                unmerged.cache.get(handle).map(|color| (handle, color))
            }
        }
    }
}
