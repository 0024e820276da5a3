pub mod algorithms;
pub mod builders;
pub mod collision;
pub mod mesh_builder;
pub mod pipeline;
pub mod skin;

pub use algorithms::{mesh_between_rings, polygon_sides, regular_radials};
pub use collision::{CollisionSurface, RayHit};
pub use mesh_builder::{GeometryData, Ring, VertexIds};
pub use pipeline::{mesh_tree, MeshConfig};
pub use skin::{BranchSkin, BuilderType, SegmentType, SkinRange, SkinSegment};
