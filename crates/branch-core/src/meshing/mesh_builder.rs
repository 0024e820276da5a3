use std::io::Write;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
#[cfg(feature = "bevy")]
use bevy_gizmos::prelude::Gizmos;
#[cfg(feature = "bevy")]
use bevy_color::Color;

use crate::growing::BranchId;

/// Identifiers carried by every vertex for downstream effects.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexIds {
    pub branch: BranchId,
    pub skin: BranchId,
    /// generator structure the branch comes from
    pub structure: usize,
}

/// One cross-section, seam included: `positions.len() == sides + 1` and the last
/// vertex duplicates the first one at radial 1.
#[derive(Clone, Debug, Default)]
pub struct Ring {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub radials: Vec<f32>,
    pub center: Vec3,
    pub direction: Vec3,
    pub girth: f32,
    /// arc length from the hierarchy base, stored in the second uv channel
    pub length_position: f32,
    pub ids: VertexIds,
}

impl Ring {
    pub fn sides(&self) -> usize {
        self.positions.len().saturating_sub(1)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GeometryData {
    pub points: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// radial position around the ring, arc length along the skin
    pub uvs: Vec<Vec2>,
    pub girths: Vec<f32>,
    pub ids: Vec<VertexIds>,
    pub centers: Vec<Vec3>,
    pub directions: Vec<Vec3>,
    pub triangles: Vec<u32>,
}

impl GeometryData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.points.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len() / 3
    }

    /// Appends the ring vertices and returns the index of the first one.
    pub fn register_ring(&mut self, ring: &Ring) -> usize {
        let start = self.points.len();
        for i in 0..ring.positions.len() {
            self.points.push(ring.positions[i]);
            self.normals.push(ring.normals[i]);
            self.uvs.push(Vec2::new(ring.radials[i], ring.length_position));
            self.girths.push(ring.girth);
            self.ids.push(ring.ids);
            self.centers.push(ring.center);
            self.directions.push(ring.direction);
        }
        start
    }

    pub fn register_triangles(&mut self, triangles: &[usize]) {
        self.triangles.extend(triangles.iter().map(|&i| i as u32));
    }

    /// Appends `other`, shifting its indices past the current vertices.
    pub fn merge(&mut self, other: &GeometryData) {
        let offset = self.points.len() as u32;
        self.points.extend_from_slice(&other.points);
        self.normals.extend_from_slice(&other.normals);
        self.uvs.extend_from_slice(&other.uvs);
        self.girths.extend_from_slice(&other.girths);
        self.ids.extend_from_slice(&other.ids);
        self.centers.extend_from_slice(&other.centers);
        self.directions.extend_from_slice(&other.directions);
        self.triangles.extend(other.triangles.iter().map(|i| i + offset));
    }

    pub fn point(&self, i: usize) -> Vec3 {
        self.points[i]
    }

    pub fn triangle(&self, i: usize) -> [usize; 3] {
        [
            self.triangles[3 * i] as usize,
            self.triangles[3 * i + 1] as usize,
            self.triangles[3 * i + 2] as usize,
        ]
    }

    /// Wavefront OBJ: positions, normals, uvs then 1-based faces.
    pub fn write_obj(&self, mut w: impl Write) -> std::io::Result<()> {
        writeln!(w, "# {} vertices, {} triangles", self.vertex_count(), self.triangle_count())?;
        for p in &self.points {
            writeln!(w, "v {} {} {}", p.x, p.y, p.z)?;
        }
        for n in &self.normals {
            writeln!(w, "vn {} {} {}", n.x, n.y, n.z)?;
        }
        for uv in &self.uvs {
            writeln!(w, "vt {} {}", uv.x, uv.y)?;
        }
        for t in self.triangles.chunks_exact(3) {
            let (a, b, c) = (t[0] + 1, t[1] + 1, t[2] + 1);
            writeln!(w, "f {a}/{a}/{a} {b}/{b}/{b} {c}/{c}/{c}")?;
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub struct MeshDebugFlags {
    pub triangles: bool,
    pub normals: bool,
}

impl crate::VisualDebug for GeometryData {
    type Flags = MeshDebugFlags;
    #[cfg(feature = "bevy")]
    fn debug(&self, gizmos: &mut Gizmos, debug_flags: Self::Flags) {
        if debug_flags.triangles {
            for i in 0..self.triangle_count() {
                let [ia, ib, ic] = self.triangle(i);
                let (pa, pb, pc) = (self.points[ia], self.points[ib], self.points[ic]);
                let color = Color::srgb(0., 0.4, 0.);
                gizmos.line(pa, pb, color);
                gizmos.line(pb, pc, color);
                gizmos.line(pc, pa, color);
            }
        }

        if debug_flags.normals {
            for (p, n) in self.points.iter().zip(self.normals.iter()) {
                gizmos.line(*p, *p + *n * 0.05, Color::srgb(0.2, 0.2, 0.8));
            }
        }
    }
}
