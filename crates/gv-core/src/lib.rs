//! GV Viewer Core Data Structures
//!
//! This crate contains the data model shared by the renderer and the viewer:
//! - SourceMesh: loaded geometry with transform, material and stable id
//! - SceneMeshes: loaded meshes grouped by model
//! - ColorRgbRmo / VisualTags: per-mesh visual state values
//! - MergePolicy / BatchConfig / ColorSettings: tunables

pub mod color;
pub mod error;
pub mod mesh;
pub mod policy;
pub mod scene;
pub mod tags;

pub use color::*;
pub use error::*;
pub use mesh::*;
pub use policy::*;
pub use scene::*;
pub use tags::*;
