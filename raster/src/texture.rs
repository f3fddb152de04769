//! Texel fetch: S/T coordinate wrap/clamp/flip followed by decode across the
//! seven texture format paths, including the 4×4 block-compressed format's
//! per-tile palette indirection.

use crate::color::{color_lerp, rgba5_to_rgba6, Rgba6};
use crate::memory::MemoryView;
use crate::polygon::Polygon;

/// Normalizes one axis coordinate per the polygon's wrap/clamp/flip flags.
fn normalize_axis(mut v: i32, size: i32, repeat: bool, flip: bool) -> i32 {
    if !repeat {
        return v.clamp(0, size - 1);
    }
    let mut wraps = 0u32;
    while v < 0 {
        v += size;
        wraps += 1;
    }
    while v >= size {
        v -= size;
        wraps += 1;
    }
    if flip && wraps % 2 == 1 {
        v = size - 1 - v;
    }
    v
}

/// Samples `polygon`'s texture at integer texel coordinates `(s, t)`,
/// returning a fully transparent texel for `texture_fmt == 0` or any
/// address that resolves through an absent slot.
#[must_use]
pub fn sample(polygon: &Polygon, s: i32, t: i32, memory: &MemoryView) -> Rgba6 {
    if polygon.texture_fmt == 0 {
        return Rgba6::TRANSPARENT;
    }

    let size_s = i32::from(polygon.size_s);
    let size_t = i32::from(polygon.size_t);
    let s = normalize_axis(s, size_s, polygon.repeat_s, polygon.flip_s);
    let t = normalize_axis(t, size_t, polygon.repeat_t, polygon.flip_t);

    decode(polygon, s, t, size_s, memory).unwrap_or(Rgba6::TRANSPARENT)
}

fn decode(polygon: &Polygon, s: i32, t: i32, size_s: i32, memory: &MemoryView) -> Option<Rgba6> {
    match polygon.texture_fmt {
        1 => decode_a3i5(polygon, s, t, size_s, memory),
        2 => decode_palette(polygon, s, t, size_s, memory, 1),
        3 => decode_palette(polygon, s, t, size_s, memory, 2),
        4 => decode_palette(polygon, s, t, size_s, memory, 3),
        5 => decode_compressed(polygon, s, t, size_s, memory),
        6 => decode_a5i3(polygon, s, t, size_s, memory),
        7 => decode_direct(polygon, s, t, size_s, memory),
        _ => None,
    }
}

fn decode_a3i5(polygon: &Polygon, s: i32, t: i32, size_s: i32, memory: &MemoryView) -> Option<Rgba6> {
    let byte = memory.get_texture_byte(polygon.texture_addr + (t * size_s + s) as u32)?;
    let index = byte & 0x1F;
    let alpha3 = byte >> 5;
    let alpha5 = alpha3 * 4 + alpha3 / 2;
    let rgb15 = memory.get_palette_color(polygon.palette_addr + u32::from(index) * 2)? & 0x7FFF;
    Some(rgba5_to_rgba6(u32::from(rgb15) | (u32::from(alpha5) << 15)))
}

fn decode_a5i3(polygon: &Polygon, s: i32, t: i32, size_s: i32, memory: &MemoryView) -> Option<Rgba6> {
    let byte = memory.get_texture_byte(polygon.texture_addr + (t * size_s + s) as u32)?;
    let index = byte & 0x7;
    let alpha5 = byte >> 3;
    let rgb15 = memory.get_palette_color(polygon.palette_addr + u32::from(index) * 2)? & 0x7FFF;
    Some(rgba5_to_rgba6(u32::from(rgb15) | (u32::from(alpha5) << 15)))
}

fn decode_direct(polygon: &Polygon, s: i32, t: i32, size_s: i32, memory: &MemoryView) -> Option<Rgba6> {
    let addr = polygon.texture_addr + 2 * (t * size_s + s) as u32;
    let word = memory.get_texture_u16(addr)?;
    let alpha5 = if word & 0x8000 != 0 { 0x1F } else { 0 };
    Some(rgba5_to_rgba6(u32::from(word & 0x7FFF) | (alpha5 << 15)))
}

/// Shared decode for the 2/4/8 bpp paletted formats, `bpp_shift` being
/// `log2(bits_per_pixel)`: 1 for 2bpp, 2 for 4bpp, 3 for 8bpp.
fn decode_palette(
    polygon: &Polygon,
    s: i32,
    t: i32,
    size_s: i32,
    memory: &MemoryView,
    bpp_shift: u32,
) -> Option<Rgba6> {
    let texel_index = (t * size_s + s) as u32;
    let bits_per_pixel = 1u32 << bpp_shift;
    let texels_per_byte = 8 / bits_per_pixel;
    let byte = memory.get_texture_byte(polygon.texture_addr + texel_index / texels_per_byte)?;
    let sub = texel_index % texels_per_byte;
    let mask = ((1u16 << bits_per_pixel) - 1) as u8;
    let index = (byte >> (sub * bits_per_pixel)) & mask;

    if index == 0 && polygon.transparent0 {
        return Some(Rgba6::TRANSPARENT);
    }

    let rgb15 = memory.get_palette_color(polygon.palette_addr + u32::from(index) * 2)? & 0x7FFF;
    Some(rgba5_to_rgba6(u32::from(rgb15) | (0x1F << 15)))
}

fn decode_compressed(polygon: &Polygon, s: i32, t: i32, size_s: i32, memory: &MemoryView) -> Option<Rgba6> {
    let tile = (t / 4) * (size_s / 4) + s / 4;
    let main_addr = polygon.texture_addr + (tile * 4 + t % 4) as u32;
    let byte = memory.get_texture_byte(main_addr)?;
    let index = (byte >> (2 * (s % 4))) & 0x3;

    let orig_slot = MemoryView::texture_slot_index(polygon.texture_addr);
    let mut pal_info_addr = 0x2_0000 + (polygon.texture_addr & 0x1_FFFF) / 2 + (tile as u32) * 2;
    if orig_slot == 2 {
        pal_info_addr += 0x1_0000;
    }
    let pal_info = memory.get_texture_u16(pal_info_addr)?;
    let pal_base = polygon.palette_addr + u32::from(pal_info & 0x3FFF) * 4;
    let mode = pal_info >> 14;

    let palette_rgb6 = |offset: u32| -> Option<Rgba6> {
        let rgb15 = memory.get_palette_color(pal_base + offset)? & 0x7FFF;
        Some(rgba5_to_rgba6(u32::from(rgb15) | (0x1F << 15)))
    };

    let c0 = palette_rgb6(0)?;
    let c1 = palette_rgb6(2)?;

    let color = match (mode, index) {
        (0, 0) => c0,
        (0, 1) => c1,
        (0, 2) => palette_rgb6(4)?,
        (0, 3) => return Some(Rgba6::TRANSPARENT),
        (1, 0) => c0,
        (1, 1) => c1,
        (1, 2) => color_lerp(c0, c1, 0, 1, 2),
        (1, 3) => return Some(Rgba6::TRANSPARENT),
        (2, 0) => c0,
        (2, 1) => c1,
        (2, 2) => palette_rgb6(4)?,
        (2, 3) => palette_rgb6(6)?,
        (3, 0) => c0,
        (3, 1) => c1,
        (3, 2) => color_lerp(c0, c1, 0, 3, 8),
        (3, 3) => color_lerp(c0, c1, 0, 5, 8),
        _ => unreachable!("mode and index are both 2-bit values"),
    };

    Some(Rgba6 { a: 0x1F, ..color })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn polygon_with(texture_fmt: u8, size_s: u16, size_t: u16, repeat: bool, flip: bool) -> Polygon {
        let mut polygon = Polygon::test_default();
        polygon.texture_fmt = texture_fmt;
        polygon.size_s = size_s;
        polygon.size_t = size_t;
        polygon.repeat_s = repeat;
        polygon.repeat_t = repeat;
        polygon.flip_s = flip;
        polygon.flip_t = flip;
        polygon
    }

    #[test]
    fn no_texture_is_transparent() {
        let polygon = polygon_with(0, 4, 4, false, false);
        let memory = MemoryView::default();
        assert_eq!(sample(&polygon, 0, 0, &memory), Rgba6::TRANSPARENT);
    }

    #[test]
    fn clamp_pins_to_edges() {
        assert_eq!(normalize_axis(-1, 4, false, false), 0);
        assert_eq!(normalize_axis(4, 4, false, false), 3);
    }

    #[test]
    fn repeat_wraps() {
        assert_eq!(normalize_axis(-1, 4, true, false), 3);
        assert_eq!(normalize_axis(4, 4, true, false), 0);
        assert_eq!(normalize_axis(5, 4, true, false), 1);
    }

    #[test]
    fn repeat_and_flip_mirrors_odd_wraps() {
        // One wrap (odd) flips the coordinate within the tile.
        assert_eq!(normalize_axis(-1, 4, true, true), 4 - 1 - 3);
        // Two wraps (even) behaves like a plain repeat.
        assert_eq!(normalize_axis(-5, 4, true, true), 3);
    }

    #[test]
    fn palette_index_zero_transparent_when_flagged() {
        let mut polygon = polygon_with(3, 2, 2, false, false);
        polygon.transparent0 = true;
        let memory = MemoryView::default();
        // Absent palette/texture slots decode to None further down but the
        // transparent0 shortcut fires before any memory access for index 0.
        let mut slot = Box::new([0u8; crate::memory::TEXTURE_SLOT_SIZE]);
        slot[0] = 0; // index 0 at s=0,t=0
        let mut memory_with_slot = MemoryView::default();
        memory_with_slot.install_texture_slot(0, Some(slot));
        let _ = memory; // silence unused in the minimal case above
        assert_eq!(sample(&polygon, 0, 0, &memory_with_slot), Rgba6::TRANSPARENT);
    }

    #[test]
    fn direct_format_alpha_is_binary() {
        let polygon = polygon_with(7, 1, 1, false, false);
        let mut slot = Box::new([0u8; crate::memory::TEXTURE_SLOT_SIZE]);
        // 16-bit color with bit15 (alpha) set.
        slot[0] = 0xFF;
        slot[1] = 0xFF;
        let mut memory = MemoryView::default();
        memory.install_texture_slot(0, Some(slot));
        let texel = sample(&polygon, 0, 0, &memory);
        assert_eq!(texel.a, 0x3F);
    }
}
