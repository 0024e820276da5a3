/// Radial positions of a regular polygon, seam included: `i / sides` for `i` in `0..=sides`.
pub fn regular_radials(sides: usize) -> Vec<f32> {
    (0..=sides).map(|i| i as f32 / sides as f32).collect()
}

/// Side count for a girth, scaled between the smallest and largest average girth of the tree.
pub fn polygon_sides(min_sides: usize, max_sides: usize, girth: f32, min_avg_girth: f32, max_avg_girth: f32) -> usize {
    let span = max_avg_girth - min_avg_girth;
    let t = if span > 0. { (girth - min_avg_girth) / span } else { 1. };
    let sides = (min_sides as f32 + (max_sides as f32 - min_sides as f32) * t.clamp(0., 1.)).round();
    (sides as usize).clamp(min_sides, max_sides.max(min_sides))
}

/// Triangles joining two consecutive rings.
///
/// Each ring starts at its vertex index (`base`, `top`) and is described by its radial
/// positions, seam included (`sides + 1` values ending at 1). Rings with the same side
/// count are joined quad by quad. Otherwise every vertex of the denser ring is walked in
/// radial order and bound to the current edge of the sparser ring until it passes the
/// middle of that edge. Evenly spread radials give `sides(base) + sides(top)` triangles.
/// Clustered radials, such as trunk profiles, may leave some vertices of the denser ring
/// unused and give fewer triangles.
pub fn mesh_between_rings(base: usize, base_radials: &[f32], top: usize, top_radials: &[f32]) -> Vec<usize> {
    let base_sides = base_radials.len().saturating_sub(1);
    let top_sides = top_radials.len().saturating_sub(1);
    let mut result = Vec::with_capacity(3 * (base_sides + top_sides));
    if base_sides == 0 || top_sides == 0 {
        return result;
    }

    if base_sides == top_sides {
        for j in 0..base_sides {
            result.extend([top + j + 1, top + j, base + j]);
            result.extend([base + j + 1, top + j + 1, base + j]);
        }
        return result;
    }

    // a: fewer sides, b: more sides
    let inverse = base_sides < top_sides;
    let (a_start, a_radials, b_start, b_radials) = if inverse {
        (base, base_radials, top, top_radials)
    } else {
        (top, top_radials, base, base_radials)
    };
    let (mut a, mut b) = (0, 0);
    let mut a_value = a_radials[0];
    let mut b_value = b_radials[0];
    let mut half_a = (a_value + a_radials[1]) / 2.;

    let emit_a = |result: &mut Vec<usize>, a: usize, b: usize| {
        if inverse {
            result.extend([b_start + b, a_start + a, a_start + a + 1]);
        } else {
            result.extend([b_start + b, a_start + a + 1, a_start + a]);
        }
    };

    while b_value < 1. && b + 1 < b_radials.len() {
        if b_value < half_a {
            if inverse {
                result.extend([b_start + b, a_start + a, b_start + b + 1]);
            } else {
                result.extend([b_start + b, b_start + b + 1, a_start + a]);
            }
            b += 1;
            b_value = b_radials[b];
        } else {
            emit_a(&mut result, a, b);
            a += 1;
            a_value = a_radials[a];
            half_a = if a_value < 1. && a + 1 < a_radials.len() {
                (a_value + a_radials[a + 1]) / 2.
            } else {
                a_value + 0.2
            };
        }
    }
    if a_value < 1. && a + 1 < a_radials.len() {
        emit_a(&mut result, a, b);
    }
    result
}
