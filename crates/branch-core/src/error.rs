use thiserror::Error;

use crate::growing::BranchId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("a curve needs at least 2 nodes, got {count}")]
    NotEnoughNodes { count: usize },
    #[error("cannot interpolate curves with {left} and {right} nodes")]
    NodeCountMismatch { left: usize, right: usize },
    #[error("a polygon needs at least 3 sides, got {sides}")]
    NotEnoughSides { sides: usize },
    #[error("no branch with id {0}")]
    UnknownBranch(BranchId),
    #[error("no shape with id {0}")]
    UnknownShape(usize),
    #[error("branch {child} cannot be attached to {parent}")]
    InvalidParent { child: BranchId, parent: BranchId },
}

pub type GeometryResult<T> = Result<T, GeometryError>;
