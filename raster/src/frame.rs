//! Frame State: per-tile framebuffer/depth/stencil/attribute buffers plus
//! the clear/toon/control registers that persist across scanline draws for
//! the lifetime of a frame.
//!
//! Buffers are split one-per-tile (rather than one flat 192-line
//! framebuffer) so the [Tile Scheduler](crate::scheduler) can hand each of
//! the four tiles to its own worker without the workers ever touching each
//! other's memory.

use crate::color::Rgba6;
use crate::memory::MemoryView;
use crate::polygon::Polygon;
use crate::registers::{
    write_clear_color, write_clear_depth, write_toon_table_entry, Disp3dCnt, TOON_TABLE_SIZE,
};
use crate::scanline::{self, Row};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

pub const SCREEN_WIDTH: usize = 256;
pub const SCREEN_HEIGHT: usize = 192;
pub const TILE_COUNT: usize = 4;
pub const TILE_HEIGHT: usize = SCREEN_HEIGHT / TILE_COUNT;

/// One 48-scanline strip's framebuffer rows plus its depth/stencil/attribute
/// buffers, which are shared across all lines of the strip.
#[serde_as]
#[derive(Serialize, Deserialize)]
pub struct TileBuffers {
    #[serde_as(as = "Box<[[_; SCREEN_WIDTH]; TILE_HEIGHT]>")]
    pub rows: Box<[[u32; SCREEN_WIDTH]; TILE_HEIGHT]>,
    #[serde_as(as = "Box<[_; SCREEN_WIDTH]>")]
    pub depth: Box<[i64; SCREEN_WIDTH]>,
    #[serde_as(as = "Box<[_; SCREEN_WIDTH]>")]
    pub stencil: Box<[bool; SCREEN_WIDTH]>,
    #[serde_as(as = "Box<[_; SCREEN_WIDTH]>")]
    pub attrib: Box<[u8; SCREEN_WIDTH]>,
}

impl Default for TileBuffers {
    #[allow(clippy::large_stack_arrays)]
    fn default() -> Self {
        Self {
            rows: Box::new([[0; SCREEN_WIDTH]; TILE_HEIGHT]),
            depth: Box::new([0; SCREEN_WIDTH]),
            stencil: Box::new([false; SCREEN_WIDTH]),
            attrib: Box::new([0; SCREEN_WIDTH]),
        }
    }
}

impl TileBuffers {
    /// Resets the shared depth/stencil/attribute state. Must run once at
    /// the tile's first scanline, not every scanline - the buffers are
    /// reused across all 48 lines, and shadow state in particular must
    /// survive from line to line within a tile.
    pub fn clear(&mut self, clear_depth: i64) {
        *self.depth = [clear_depth; SCREEN_WIDTH];
        *self.stencil = [false; SCREEN_WIDTH];
        *self.attrib = [0; SCREEN_WIDTH];
    }
}

/// Registers written by the host between frames: control word, clear
/// values, and the toon table.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RegisterState {
    pub clear_color: Rgba6,
    pub clear_depth: i64,
    pub toon_table: [Rgba6; TOON_TABLE_SIZE],
    pub disp_3d_cnt: Disp3dCnt,
}

impl RegisterState {
    pub fn write_disp_3d_cnt(&mut self, mask: u16, value: u16) {
        self.disp_3d_cnt.write(mask, value);
    }

    pub fn write_clear_color(&mut self, mask: u32, value: u32) {
        self.clear_color = write_clear_color(mask, value);
    }

    pub fn write_clear_depth(&mut self, mask: u16, value: u16) {
        self.clear_depth = write_clear_depth(mask, value);
    }

    pub fn write_toon_table(&mut self, index: usize, mask: u16, value: u16) {
        debug_assert!(index < TOON_TABLE_SIZE);
        self.toon_table[index] = write_toon_table_entry(mask, value);
    }
}

/// Draws one scanline of `tile`, clearing its shared buffers first if
/// `line` is the tile's first, then rasterizing `polygons` in
/// opaque-then-translucent submission order.
pub fn draw_tile_scanline(
    tile: &mut TileBuffers,
    registers: &RegisterState,
    line: usize,
    polygons: &[Polygon],
    memory: &MemoryView,
) {
    debug_assert!(line < SCREEN_HEIGHT);
    let local_line = line % TILE_HEIGHT;
    if local_line == 0 {
        tile.clear(registers.clear_depth);
    }
    tile.rows[local_line] = [registers.clear_color.pack(); SCREEN_WIDTH];

    let highlight = registers.disp_3d_cnt.highlight_enabled();
    let mut row = Row {
        framebuffer: &mut tile.rows[local_line][..],
        depth: &mut tile.depth[..],
        stencil: &mut tile.stencil[..],
        attrib: &mut tile.attrib[..],
    };

    for polygon in polygons.iter().filter(|p| p.is_opaque()) {
        scanline::rasterize_polygon_row(
            polygon,
            line as i32,
            &mut row,
            memory,
            &registers.toon_table,
            highlight,
        );
    }
    for polygon in polygons.iter().filter(|p| !p.is_opaque()) {
        scanline::rasterize_polygon_row(
            polygon,
            line as i32,
            &mut row,
            memory,
            &registers.toon_table,
            highlight,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polygon::Vertex;
    use pretty_assertions::assert_eq;

    fn triangle(color: Rgba6) -> Polygon {
        let mut polygon = Polygon::test_default();
        polygon.vertices = vec![
            Vertex { x: 64, y: 48, z: 0, w: 0x1000, color, s: 0, t: 0 },
            Vertex { x: 192, y: 48, z: 0, w: 0x1000, color, s: 0, t: 0 },
            Vertex { x: 128, y: 144, z: 0, w: 0x1000, color, s: 0, t: 0 },
        ];
        polygon
    }

    #[test]
    fn clears_to_clear_color_outside_polygons() {
        let mut tile = TileBuffers::default();
        let mut registers = RegisterState::default();
        registers.write_clear_color(0xFFFF_FFFF, 0x0000_7FFF);
        let memory = MemoryView::default();
        draw_tile_scanline(&mut tile, &registers, 10, &[], &memory);
        assert_eq!(tile.rows[10][0], registers.clear_color.pack());
    }

    #[test]
    fn tile_buffers_persist_across_lines_within_a_tile() {
        let mut tile = TileBuffers::default();
        let registers = RegisterState::default();
        let memory = MemoryView::default();
        let mut shadow = triangle(Rgba6 { r: 0x3F, g: 0, b: 0, a: 0x3F });
        shadow.mode = 3;
        shadow.id = 0;

        draw_tile_scanline(&mut tile, &registers, 0, std::slice::from_ref(&shadow), &memory);
        assert!(tile.stencil[128]);
        draw_tile_scanline(&mut tile, &registers, 1, &[], &memory);
        assert!(tile.stencil[128]);
    }

    #[test]
    fn opaque_drawn_before_translucent_regardless_of_submission_order() {
        let mut tile = TileBuffers::default();
        let registers = RegisterState::default();
        let memory = MemoryView::default();
        let mut translucent = triangle(Rgba6 { r: 0, g: 0x3F, b: 0, a: 0x10 });
        let opaque = triangle(Rgba6 { r: 0x3F, g: 0, b: 0, a: 0x3F });
        translucent.vertices.iter_mut().for_each(|v| v.z = 0x100);

        draw_tile_scanline(&mut tile, &registers, 96, &[translucent, opaque], &memory);
        let pixel = Rgba6::unpack(tile.rows[96 % TILE_HEIGHT][128]);
        assert_eq!(pixel.a, 0x3F);
        assert!(pixel.r > 0);
    }
}
