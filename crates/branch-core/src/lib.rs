pub mod curve;
pub mod error;
pub mod growing;
pub mod meshing;
pub mod utils;

pub use curve::{ControlNode, Curve, CurveSample, CurveSettings, HandleStyle, NormalMode, ResponseCurve};
pub use error::{GeometryError, GeometryResult};
pub use growing::generation::GrowConfig;
pub use growing::{Branch, BranchId, BranchTree, Sprout};
pub use meshing::mesh_builder::MeshDebugFlags;
pub use meshing::{mesh_tree, GeometryData, MeshConfig};

pub trait VisualDebug {
    type Flags;
    #[cfg(feature = "bevy")]
    fn debug(&self, gizmos: &mut bevy_gizmos::prelude::Gizmos, debug_flags: Self::Flags);
}

pub trait TreePipelinePhase {
    type Previous;
    type Config;
    type Builder;
    fn generate_from(prev: Self::Previous, config: &Self::Config, builder: &mut Self::Builder) -> Self;
}

pub trait Grow {
    fn grow<Next>(self, config: &Next::Config, builder: &mut Next::Builder) -> Next
    where
        Next: TreePipelinePhase<Previous = Self>;
}

impl<T> Grow for T {
    fn grow<Next>(self, config: &Next::Config, builder: &mut Next::Builder) -> Next
    where
        Next: TreePipelinePhase<Previous = T>,
    {
        Next::generate_from(self, config, builder)
    }
}

pub struct Seed;

/// An empty tree when generation fails; the error is logged.
impl TreePipelinePhase for BranchTree {
    type Previous = Seed;
    type Config = GrowConfig;
    type Builder = rand::rngs::StdRng;
    fn generate_from(_: Self::Previous, config: &Self::Config, rng: &mut Self::Builder) -> Self {
        growing::generation::grow_tree(config, rng).unwrap_or_else(|e| {
            log::error!("tree generation failed: {e}");
            BranchTree::new()
        })
    }
}

/// An empty mesh when meshing fails; the error is logged.
impl TreePipelinePhase for GeometryData {
    type Previous = BranchTree;
    type Config = MeshConfig;
    type Builder = rand::rngs::StdRng;
    fn generate_from(mut prev: Self::Previous, config: &Self::Config, rng: &mut Self::Builder) -> Self {
        mesh_tree(&mut prev, config, rng).unwrap_or_else(|e| {
            log::error!("meshing failed: {e}");
            GeometryData::new()
        })
    }
}
