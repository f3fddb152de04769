//! The inner rasterizer: given a polygon and a scanline, walks the span
//! between its left and right edges, testing depth/stencil/attribute state,
//! shading with the polygon's texture and combine mode, and writing pixels.

use crate::color::{color_lerp, color_lerp_persp, Rgba6};
use crate::fixed::{lerp, lerp_persp, normalize_w_group, w_interp};
use crate::memory::MemoryView;
use crate::polygon::{CombineMode, Polygon};
use crate::texture;

/// The per-tile row buffers a single scanline draws into. Depth, stencil
/// and attribute buffers are shared across the 48 lines of a tile and are
/// only indexed here, never cleared - clearing is the tile's job at its
/// first scanline.
pub struct Row<'a> {
    pub framebuffer: &'a mut [u32],
    pub depth: &'a mut [i64],
    pub stencil: &'a mut [bool],
    pub attrib: &'a mut [u8],
}

const PIXEL_3D_MARKER: u32 = 1 << 26;
const PIXEL_ALPHA_MASK: u32 = 0x3F << 18;

fn depth_test_passes(polygon: &Polygon, existing: i64, depth: i64) -> bool {
    if polygon.depth_test_equal {
        existing - 0x200 >= depth
    } else {
        existing > depth
    }
}

fn modulate_channel(texel: u8, color: u8) -> u8 {
    (((u16::from(texel) + 1) * (u16::from(color) + 1) - 1) / 64) as u8
}

fn modulate(texel: Rgba6, color: Rgba6) -> Rgba6 {
    Rgba6 {
        r: modulate_channel(texel.r, color.r),
        g: modulate_channel(texel.g, color.g),
        b: modulate_channel(texel.b, color.b),
        a: modulate_channel(texel.a, color.a),
    }
}

fn decal(texel: Rgba6, color: Rgba6) -> Rgba6 {
    let at = u32::from(texel.a);
    let blend = |t: u8, c: u8| ((u32::from(t) * at + u32::from(c) * (63 - at)) / 64) as u8;
    Rgba6 {
        r: blend(texel.r, color.r),
        g: blend(texel.g, color.g),
        b: blend(texel.b, color.b),
        a: color.a,
    }
}

fn toon(texel: Rgba6, color: Rgba6, toon_table: &[Rgba6; 32], highlight: bool) -> Rgba6 {
    let toon = toon_table[usize::from(color.r / 2)];
    let mut out = Rgba6 {
        r: modulate_channel(texel.r, toon.r),
        g: modulate_channel(texel.g, toon.g),
        b: modulate_channel(texel.b, toon.b),
        a: modulate_channel(texel.a, color.a),
    };
    if highlight {
        out.r = out.r.saturating_add(toon.r).min(0x3F);
        out.g = out.g.saturating_add(toon.g).min(0x3F);
        out.b = out.b.saturating_add(toon.b).min(0x3F);
    }
    out
}

fn combine(
    polygon: &Polygon,
    texel: Rgba6,
    color: Rgba6,
    toon_table: &[Rgba6; 32],
    highlight: bool,
) -> Rgba6 {
    match polygon.combine_mode() {
        CombineMode::Modulation => modulate(texel, color),
        CombineMode::Decal | CombineMode::Shadow => decal(texel, color),
        CombineMode::Toon => toon(texel, color, toon_table, highlight),
    }
}

/// Edge-pair interpolants computed once per scanline, at the first pixel
/// that survives the depth/stencil tests (§4.5's "lazy edge interpolants").
struct LazyInterpolants {
    c1: Rgba6,
    c2: Rgba6,
    s1: i64,
    s2: i64,
    t1: i64,
    t2: i64,
}

#[allow(clippy::too_many_arguments)]
fn lazy_interpolants(
    polygon: &Polygon,
    line: i64,
    y1: i64,
    y2: i64,
    y3: i64,
    y4: i64,
    v1: &crate::polygon::Vertex,
    v2: &crate::polygon::Vertex,
    v3: &crate::polygon::Vertex,
    v4: &crate::polygon::Vertex,
    w1n: i64,
    w2n: i64,
    w3n: i64,
    w4n: i64,
) -> LazyInterpolants {
    let c1 = color_lerp_persp(v1.color, v2.color, y1, line, y2, w1n, w2n);
    let c2 = color_lerp_persp(v3.color, v4.color, y3, line, y4, w3n, w4n);
    let (s1, t1, s2, t2) = if polygon.texture_fmt != 0 {
        (
            lerp_persp(i64::from(v1.s), i64::from(v2.s), y1, line, y2, w1n, w2n),
            lerp_persp(i64::from(v1.t), i64::from(v2.t), y1, line, y2, w1n, w2n),
            lerp_persp(i64::from(v3.s), i64::from(v4.s), y3, line, y4, w3n, w4n),
            lerp_persp(i64::from(v3.t), i64::from(v4.t), y3, line, y4, w3n, w4n),
        )
    } else {
        (0, 0, 0, 0)
    };
    LazyInterpolants { c1, c2, s1, s2, t1, t2 }
}

/// Rasterizes `polygon`'s contribution to a single scanline into `row`.
/// No-op if the polygon doesn't cover `line`.
pub fn rasterize_polygon_row(
    polygon: &Polygon,
    line: i32,
    row: &mut Row,
    memory: &MemoryView,
    toon_table: &[Rgba6; 32],
    highlight: bool,
) {
    let Some([i1, i2, i3, i4]) = polygon.edges_for_scanline(line) else {
        return;
    };
    let (v1, v2, v3, v4) = (
        &polygon.vertices[i1],
        &polygon.vertices[i2],
        &polygon.vertices[i3],
        &polygon.vertices[i4],
    );

    let (ws, w_shift) = normalize_w_group([v1.w, v2.w, v3.w, v4.w]);
    let [w1n, w2n, w3n, w4n] = ws;

    let line = i64::from(line);
    let (y1, y2, y3, y4) = (
        i64::from(v1.y),
        i64::from(v2.y),
        i64::from(v3.y),
        i64::from(v4.y),
    );

    let x1 = lerp(i64::from(v1.x), i64::from(v2.x), y1, line, y2);
    let x2 = lerp(i64::from(v3.x), i64::from(v4.x), y3, line, y4);
    let (z1, z2) = if polygon.w_buffer {
        (0, 0)
    } else {
        (
            lerp(v1.z, v2.z, y1, line, y2),
            lerp(v3.z, v4.z, y3, line, y4),
        )
    };
    let edge_w1 = w_interp(w1n, w2n, y1, line, y2);
    let edge_w2 = w_interp(w3n, w4n, y3, line, y4);

    let mut lazy: Option<LazyInterpolants> = None;

    for x in x1..x2 {
        let idx = x as usize;
        let Some(depth_slot) = row.depth.get(idx).copied() else {
            continue;
        };

        let depth = if polygon.w_buffer {
            w_interp(edge_w1, edge_w2, x1, x, x2) << w_shift
        } else {
            lerp(z1, z2, x1, x, x2)
        };

        if !depth_test_passes(polygon, depth_slot, depth) {
            continue;
        }

        if polygon.combine_mode() == CombineMode::Shadow {
            if polygon.id == 0 {
                row.stencil[idx] = true;
                continue;
            }
            if row.stencil[idx] || row.attrib[idx] == polygon.id {
                row.stencil[idx] = false;
                continue;
            }
        }

        let interp = lazy.get_or_insert_with(|| {
            lazy_interpolants(
                polygon, line, y1, y2, y3, y4, v1, v2, v3, v4, w1n, w2n, w3n, w4n,
            )
        });

        let color = color_lerp_persp(interp.c1, interp.c2, x1, x, x2, edge_w1, edge_w2);
        let shaded = if polygon.texture_fmt != 0 {
            let s = lerp_persp(interp.s1, interp.s2, x1, x, x2, edge_w1, edge_w2);
            let t = lerp_persp(interp.t1, interp.t2, x1, x, x2, edge_w1, edge_w2);
            let texel = texture::sample(polygon, (s >> 4) as i32, (t >> 4) as i32, memory);
            combine(polygon, texel, color, toon_table, highlight)
        } else {
            // No texture bound: the combine stage has nothing to modulate
            // against, so the vertex color passes straight through.
            color
        };

        if shaded.a == 0 {
            continue;
        }

        let existing_word = row.framebuffer[idx];
        let existing_is_3d = existing_word & PIXEL_ALPHA_MASK != 0;

        if shaded.a < 0x3F && existing_is_3d {
            let existing = Rgba6::unpack(existing_word);
            let blended = color_lerp(existing, shaded, 0, i64::from(shaded.a), 63);
            row.framebuffer[idx] = PIXEL_3D_MARKER | blended.pack();
            if polygon.trans_new_depth {
                row.depth[idx] = depth;
            }
        } else {
            row.framebuffer[idx] = PIXEL_3D_MARKER | shaded.pack();
            row.depth[idx] = depth;
        }
        row.attrib[idx] = polygon.id;
    }
}
