//! Per-mesh color side table.
//!
//! Each mesh id maps to its visual tags and three color slots:
//! - default: derived once from the native material, then immutable
//! - custom: optional override used while the `colored` tag is set
//! - computed: the resolved display color, the only slot batches read
//!
//! The computed slot is a function of the tags, the default and custom
//! slots and the global [`ColorSettings`]. It must be re-resolved whenever
//! any of those inputs change.

use std::collections::HashMap;

use gv_core::{ColorRgbRmo, ColorSettings, MeshId, SourceMesh, VisualTags};

/// Result of resolving a mesh's display color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    pub color: ColorRgbRmo,
    /// True if the opacity differs from the previously resolved opacity.
    pub opacity_changed: bool,
}

#[derive(Debug, Clone, Default)]
struct ColorRecord {
    tags: VisualTags,
    default: Option<ColorRgbRmo>,
    custom: Option<ColorRgbRmo>,
    computed: Option<ColorRgbRmo>,
}

/// Side table of visual tags and color slots, keyed by mesh id.
#[derive(Debug, Clone, Default)]
pub struct ColorState {
    records: HashMap<MeshId, ColorRecord>,
    settings: ColorSettings,
}

impl ColorState {
    pub fn new(settings: ColorSettings) -> Self {
        Self {
            records: HashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &ColorSettings {
        &self.settings
    }

    /// Replaces the global colors and returns every mesh that carries a tag.
    ///
    /// Cached default and custom slots are kept; the caller re-resolves the
    /// returned meshes.
    pub fn set_settings(&mut self, settings: ColorSettings) -> Vec<MeshId> {
        self.settings = settings;
        self.tagged_meshes()
    }

    /// Default color of a mesh, computed from its material on first use.
    pub fn default_color(&mut self, mesh: &SourceMesh) -> ColorRgbRmo {
        let record = self.records.entry(mesh.id.clone()).or_default();
        *record
            .default
            .get_or_insert_with(|| mesh.material.map(ColorRgbRmo::from).unwrap_or_default())
    }

    /// Sets the custom override slot. Does not re-resolve.
    pub fn set_custom(&mut self, id: &MeshId, color: ColorRgbRmo) {
        self.records.entry(id.clone()).or_default().custom = Some(color);
    }

    /// Removes the custom override slot. Does not re-resolve.
    pub fn clear_custom(&mut self, id: &MeshId) {
        if let Some(record) = self.records.get_mut(id) {
            record.custom = None;
        }
    }

    pub fn custom(&self, id: &MeshId) -> Option<ColorRgbRmo> {
        self.records.get(id).and_then(|r| r.custom)
    }

    /// Last resolved color, if the mesh was ever resolved.
    pub fn computed(&self, id: &MeshId) -> Option<ColorRgbRmo> {
        self.records.get(id).and_then(|r| r.computed)
    }

    pub fn tags(&self, id: &MeshId) -> VisualTags {
        self.records.get(id).map(|r| r.tags).unwrap_or_default()
    }

    pub fn tags_mut(&mut self, id: &MeshId) -> &mut VisualTags {
        &mut self.records.entry(id.clone()).or_default().tags
    }

    /// Meshes with at least one tag set.
    pub fn tagged_meshes(&self) -> Vec<MeshId> {
        self.records
            .iter()
            .filter(|(_, r)| !r.tags.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Resolves the display color of a mesh and stores it in the computed slot.
    pub fn resolve(&mut self, mesh: &SourceMesh) -> Resolved {
        let default = self.default_color(mesh);
        let settings = self.settings;
        let record = self.records.entry(mesh.id.clone()).or_default();

        let base = match (record.tags.colored, record.custom) {
            (true, Some(custom)) => custom,
            _ => default,
        };

        let tags = record.tags;
        let color = if tags.highlighted {
            base.with_rgb(settings.highlight_color)
        } else if tags.selected {
            base.with_rgb(settings.selection_color)
        } else if tags.isolated {
            let [r, g, b] = settings.isolation_color;
            ColorRgbRmo::new(r, g, b, 1.0, 0.0, settings.isolation_opacity)
        } else {
            base
        };

        let previous_opacity = record.computed.map(|c| c.opacity).unwrap_or(default.opacity);
        record.computed = Some(color);

        Resolved {
            color,
            opacity_changed: previous_opacity != color.opacity,
        }
    }

    /// Drops every slot and tag of a mesh. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &MeshId) {
        self.records.remove(id);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gv_core::{MaterialInfo, MeshGeometry, ModelId};

    use super::*;

    const HIGHLIGHT: [f32; 3] = [1.0, 1.0, 0.0];
    const SELECTION: [f32; 3] = [1.0, 0.0, 0.0];
    const ISOLATION: [f32; 3] = [0.5, 0.5, 0.5];

    fn settings() -> ColorSettings {
        ColorSettings {
            isolation_color: ISOLATION,
            isolation_opacity: 0.25,
            selection_color: SELECTION,
            highlight_color: HIGHLIGHT,
        }
    }

    fn mesh() -> SourceMesh {
        let model = ModelId::new("m");
        SourceMesh::new(&model, "wall", Arc::new(MeshGeometry::quad(1.0))).with_material(
            MaterialInfo {
                base_color: [0.0, 0.0, 1.0],
                roughness: 0.4,
                metalness: 0.6,
                opacity: 1.0,
            },
        )
    }

    #[test]
    fn test_untagged_resolves_to_default() {
        let mut state = ColorState::new(settings());
        let mesh = mesh();
        let resolved = state.resolve(&mesh);
        assert_eq!(resolved.color, ColorRgbRmo::new(0.0, 0.0, 1.0, 0.4, 0.6, 1.0));
        assert!(!resolved.opacity_changed);
    }

    #[test]
    fn test_missing_material_uses_fallback() {
        let mut state = ColorState::default();
        let model = ModelId::new("m");
        let mesh = SourceMesh::new(&model, "bare", Arc::new(MeshGeometry::quad(1.0)));
        assert_eq!(state.default_color(&mesh), ColorRgbRmo::default());
    }

    #[test]
    fn test_priority_over_all_tag_combinations() {
        let custom = ColorRgbRmo::new(0.0, 1.0, 0.0, 0.2, 0.3, 0.9);
        let default = ColorRgbRmo::new(0.0, 0.0, 1.0, 0.4, 0.6, 1.0);
        let mesh = mesh();

        for bits in 0u8..16 {
            let tags = VisualTags::from_bits(bits);
            let mut state = ColorState::new(settings());
            state.set_custom(&mesh.id, custom);
            *state.tags_mut(&mesh.id) = tags;

            let base = if tags.colored { custom } else { default };
            let expected = if tags.highlighted {
                base.with_rgb(HIGHLIGHT)
            } else if tags.selected {
                base.with_rgb(SELECTION)
            } else if tags.isolated {
                ColorRgbRmo::new(0.5, 0.5, 0.5, 1.0, 0.0, 0.25)
            } else {
                base
            };

            assert_eq!(state.resolve(&mesh).color, expected, "tags {:?}", tags);
            assert_eq!(state.computed(&mesh.id), Some(expected));
        }
    }

    #[test]
    fn test_selected_resolves_to_selection_color() {
        let mut state = ColorState::new(settings());
        let mesh = mesh();
        state.tags_mut(&mesh.id).selected = true;
        let color = state.resolve(&mesh).color;
        assert_eq!((color.r, color.g, color.b), (1.0, 0.0, 0.0));
    }

    #[test]
    fn test_cleared_custom_falls_back_to_default() {
        let mut state = ColorState::new(settings());
        let mesh = mesh();
        state.set_custom(&mesh.id, ColorRgbRmo::new(1.0, 0.0, 1.0, 1.0, 0.0, 1.0));
        state.tags_mut(&mesh.id).colored = true;
        state.clear_custom(&mesh.id);
        assert_eq!(state.resolve(&mesh).color, state.default_color(&mesh));
    }

    #[test]
    fn test_opacity_changed_tracks_previous_resolve() {
        let mut state = ColorState::new(settings());
        let mesh = mesh();
        state.resolve(&mesh);

        state.tags_mut(&mesh.id).isolated = true;
        assert!(state.resolve(&mesh).opacity_changed);
        assert!(!state.resolve(&mesh).opacity_changed);

        state.tags_mut(&mesh.id).isolated = false;
        assert!(state.resolve(&mesh).opacity_changed);
    }

    #[test]
    fn test_set_settings_returns_tagged_meshes() {
        let mut state = ColorState::new(settings());
        let mesh = mesh();
        state.default_color(&mesh);
        assert!(state.set_settings(settings()).is_empty());

        state.tags_mut(&mesh.id).highlighted = true;
        let default_before = state.default_color(&mesh);
        let tagged = state.set_settings(ColorSettings::default());
        assert_eq!(tagged, vec![mesh.id.clone()]);
        assert_eq!(state.default_color(&mesh), default_before);
    }
}
