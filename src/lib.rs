use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use branch_core::{
    mesh_tree, Branch, BranchTree, GeometryData, GeometryError, Grow, GrowConfig, MeshConfig, Seed,
    TreePipelinePhase, VisualDebug,
};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("geometry: {0}")]
    Geometry(#[from] GeometryError),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub seed: u64,
    pub grow: GrowConfig,
    pub mesh: MeshConfig,
}

impl TreeConfig {
    pub fn from_toml(content: &str) -> Result<Self, ExportError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Grows and meshes the tree with one generator seeded from `seed`.
    pub fn build(&self) -> Result<(BranchTree, GeometryData), ExportError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut tree = branch_core::growing::generation::grow_tree(&self.grow, &mut rng)?;
        let mesh = mesh_tree(&mut tree, &self.mesh, &mut rng)?;
        Ok((tree, mesh))
    }
}

pub fn write_obj(mesh: &GeometryData, path: impl AsRef<Path>) -> Result<(), ExportError> {
    let file = File::create(path)?;
    mesh.write_obj(BufWriter::new(file))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_config() {
        let config = TreeConfig::from_toml(
            r#"
            seed = 7

            [grow]
            max_level = 1

            [mesh]
            max_sides = 8

            [mesh.welding.branch]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.grow.max_level, 1);
        assert_eq!(config.grow.trunk_length, GrowConfig::default().trunk_length);
        assert_eq!(config.mesh.max_sides, 8);
        assert!(config.mesh.welding.branch.enabled);
        assert!(!config.mesh.welding.root.enabled);
    }

    #[test]
    fn rejects_malformed_config() {
        let result = TreeConfig::from_toml("[mesh]\nmax_sides = \"many\"");
        assert!(matches!(result, Err(ExportError::Toml(_))));
    }
}
