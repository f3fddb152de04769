//! Tile Scheduler: owns the four tiles' buffers, the shared registers, and
//! (in threaded mode) the four long-lived worker threads that draw them in
//! parallel.
//!
//! Each tile's buffers sit behind their own `Mutex` rather than one lock
//! over the whole frame, so a worker drawing tile 0 never blocks on tile 3's
//! lock - the only state workers actually share is the registers, memory,
//! and polygon list, each briefly relocked per scanline.

use crate::frame::{
    draw_tile_scanline, RegisterState, TileBuffers, SCREEN_HEIGHT, SCREEN_WIDTH, TILE_COUNT,
    TILE_HEIGHT,
};
use crate::memory::{MemoryView, PALETTE_SLOT_SIZE, TEXTURE_SLOT_SIZE};
use crate::polygon::{Polygon, MAX_VERTICES, MIN_VERTICES};
use macros::acquire_lock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

type SharedTile = Arc<Mutex<TileBuffers>>;
type SharedRegisters = Arc<Mutex<RegisterState>>;
type SharedMemory = Arc<Mutex<MemoryView>>;
type SharedPolygons = Arc<Mutex<Vec<Polygon>>>;

/// Draws every line in `lines` (all belonging to the same tile) into `tile`.
/// Registers and the polygon list are snapshotted once up front; memory is
/// relocked per line since texture installs can race a draw in progress.
fn draw_lines(
    tile: &SharedTile,
    registers: &SharedRegisters,
    memory: &SharedMemory,
    polygons: &SharedPolygons,
    lines: impl Iterator<Item = usize>,
) {
    let registers = acquire_lock!(registers, guard => { *guard });
    let polygons = acquire_lock!(polygons, guard => { guard.clone() });
    acquire_lock!(tile, tile_guard => {
        for line in lines {
            acquire_lock!(memory, memory_guard => {
                draw_tile_scanline(&mut tile_guard, &registers, line, &polygons, &memory_guard);
            });
        }
    });
}

/// A persistent worker thread dedicated to one tile. Lives for the
/// `Renderer`'s whole lifetime; `render_frame` wakes it once per frame
/// rather than spawning a thread per frame.
struct WorkerHandle {
    start_tx: Sender<()>,
    done_rx: Receiver<()>,
    join: Option<JoinHandle<()>>,
}

fn spawn_worker(
    tile_index: usize,
    tile: SharedTile,
    registers: SharedRegisters,
    memory: SharedMemory,
    polygons: SharedPolygons,
) -> WorkerHandle {
    let (start_tx, start_rx) = mpsc::channel::<()>();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let join = std::thread::Builder::new()
        .name(format!("raster-tile-{tile_index}"))
        .spawn(move || {
            let lines: Vec<usize> = (0..TILE_HEIGHT).map(|l| tile_index * TILE_HEIGHT + l).collect();
            while start_rx.recv().is_ok() {
                draw_lines(&tile, &registers, &memory, &polygons, lines.iter().copied());
                if done_tx.send(()).is_err() {
                    break;
                }
            }
        })
        .expect("failed to spawn tile worker thread");

    WorkerHandle {
        start_tx,
        done_rx,
        join: Some(join),
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let (disconnected_tx, _) = mpsc::channel();
        self.start_tx = disconnected_tx;
        if let Some(join) = self.join.take() {
            join.join().ok();
        }
    }
}

/// Renders one frame at a time, either sequentially on the calling thread
/// or by fanning the four tiles out to dedicated worker threads.
pub struct Renderer {
    tiles: [SharedTile; TILE_COUNT],
    registers: SharedRegisters,
    memory: SharedMemory,
    polygons: SharedPolygons,
    workers: Option<Vec<WorkerHandle>>,
}

impl Renderer {
    #[must_use]
    pub fn new(threaded: bool) -> Self {
        let tiles: [SharedTile; TILE_COUNT] =
            std::array::from_fn(|_| Arc::new(Mutex::new(TileBuffers::default())));
        let registers = Arc::new(Mutex::new(RegisterState::default()));
        let memory = Arc::new(Mutex::new(MemoryView::default()));
        let polygons = Arc::new(Mutex::new(Vec::new()));

        let workers = threaded.then(|| {
            tiles
                .iter()
                .enumerate()
                .map(|(i, tile)| {
                    spawn_worker(
                        i,
                        tile.clone(),
                        registers.clone(),
                        memory.clone(),
                        polygons.clone(),
                    )
                })
                .collect()
        });

        Self {
            tiles,
            registers,
            memory,
            polygons,
            workers,
        }
    }

    pub fn write_disp_3d_cnt(&self, mask: u16, value: u16) {
        acquire_lock!(self.registers, guard => { guard.write_disp_3d_cnt(mask, value); });
    }

    pub fn write_clear_color(&self, mask: u32, value: u32) {
        acquire_lock!(self.registers, guard => { guard.write_clear_color(mask, value); });
    }

    pub fn write_clear_depth(&self, mask: u16, value: u16) {
        acquire_lock!(self.registers, guard => { guard.write_clear_depth(mask, value); });
    }

    pub fn write_toon_table(&self, index: usize, mask: u16, value: u16) {
        acquire_lock!(self.registers, guard => { guard.write_toon_table(index, mask, value); });
    }

    pub fn install_texture_slot(&self, i: usize, data: Option<Box<[u8; TEXTURE_SLOT_SIZE]>>) {
        acquire_lock!(self.memory, guard => { guard.install_texture_slot(i, data); });
    }

    pub fn install_palette_slot(&self, i: usize, data: Option<Box<[u8; PALETTE_SLOT_SIZE]>>) {
        acquire_lock!(self.memory, guard => { guard.install_palette_slot(i, data); });
    }

    pub fn install_polygon_list(&self, polygons: Vec<Polygon>) {
        let polygons: Vec<Polygon> = polygons
            .into_iter()
            .filter(|p| {
                let len = p.vertices.len();
                let ok = (MIN_VERTICES..=MAX_VERTICES).contains(&len);
                if !ok {
                    logger::log(format!(
                        "install_polygon_list: dropping polygon with {len} vertices (must be {MIN_VERTICES}..={MAX_VERTICES})"
                    ));
                }
                ok
            })
            .collect();
        acquire_lock!(self.polygons, guard => { *guard = polygons; });
    }

    /// Draws a single scanline, the sole host-facing entry point for
    /// rendering. In single-threaded mode this synchronously draws `line`.
    /// In threaded mode it instead drives the four tile workers' spawn/join
    /// protocol: `line == 0` wakes every worker, `line` being the last row
    /// of a tile joins that tile's worker, and every other line is a no-op -
    /// the worker itself draws all 48 of its rows once woken.
    pub fn draw_scanline(&self, line: usize) {
        debug_assert!(line < SCREEN_HEIGHT);
        let tile_index = line / TILE_HEIGHT;

        let Some(workers) = &self.workers else {
            draw_lines(
                &self.tiles[tile_index],
                &self.registers,
                &self.memory,
                &self.polygons,
                std::iter::once(line),
            );
            return;
        };

        if line == 0 {
            for worker in workers {
                worker.start_tx.send(()).ok();
            }
        }
        if line % TILE_HEIGHT == TILE_HEIGHT - 1 {
            workers[tile_index].done_rx.recv().ok();
        }
    }

    /// Draws a full frame by walking every scanline in order, exactly as a
    /// host driving the per-scanline interface would.
    pub fn render_frame(&self) {
        for line in 0..SCREEN_HEIGHT {
            self.draw_scanline(line);
        }
    }

    /// Assembles the four tiles' rows into one full framebuffer.
    #[must_use]
    pub fn read_framebuffer(&self) -> Box<[[u32; SCREEN_WIDTH]; SCREEN_HEIGHT]> {
        let mut out = Box::new([[0u32; SCREEN_WIDTH]; SCREEN_HEIGHT]);
        for (tile_index, tile) in self.tiles.iter().enumerate() {
            acquire_lock!(tile, guard => {
                for (local_line, row) in guard.rows.iter().enumerate() {
                    out[tile_index * TILE_HEIGHT + local_line] = *row;
                }
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgba6;
    use crate::polygon::Vertex;

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
    fn single_threaded_renders_a_full_frame() {
        let renderer = Renderer::new(false);
        renderer.install_polygon_list(vec![triangle(Rgba6 {
            r: 0x3F,
            g: 0,
            b: 0,
            a: 0x3F,
        })]);
        renderer.render_frame();
        let fb = renderer.read_framebuffer();
        let center = Rgba6::unpack(fb[96][128]);
        assert_eq!(center.r, 0x3F);
    }

    #[test]
    fn install_polygon_list_drops_polygons_with_too_few_vertices() {
        let mut degenerate = Polygon::test_default();
        degenerate.vertices = vec![Vertex::default(), Vertex::default()];

        let renderer = Renderer::new(false);
        renderer.install_polygon_list(vec![
            degenerate,
            triangle(Rgba6 { r: 0x3F, g: 0x3F, b: 0x3F, a: 0x3F }),
        ]);
        renderer.render_frame();
        // Still renders the surviving triangle rather than panicking on the
        // two-vertex one.
        let center = Rgba6::unpack(renderer.read_framebuffer()[96][128]);
        assert_eq!(center.a, 0x3F);
    }

    #[test]
    fn threaded_renderer_matches_single_threaded_output() {
        let polygon = triangle(Rgba6 {
            r: 0,
            g: 0x3F,
            b: 0,
            a: 0x3F,
        });

        let single = Renderer::new(false);
        single.install_polygon_list(vec![polygon.clone()]);
        single.render_frame();

        let threaded = Renderer::new(true);
        threaded.install_polygon_list(vec![polygon]);
        threaded.render_frame();

        assert_eq!(*single.read_framebuffer(), *threaded.read_framebuffer());
    }

    #[test]
    fn renderer_can_be_dropped_cleanly_with_workers_running() {
        let renderer = Renderer::new(true);
        renderer.render_frame();
        drop(renderer);
    }

    #[test]
    fn threaded_draw_scanline_driven_one_line_at_a_time_matches_render_frame() {
        // A host that only ever calls `draw_scanline` (never `render_frame`)
        // must still get the full threaded draw: line 0 wakes every worker,
        // and line 47/95/143/191 joins that tile's worker before its rows
        // are read back.
        let polygon = triangle(Rgba6 {
            r: 0,
            g: 0,
            b: 0x3F,
            a: 0x3F,
        });

        let expected = Renderer::new(false);
        expected.install_polygon_list(vec![polygon.clone()]);
        expected.render_frame();

        let threaded = Renderer::new(true);
        threaded.install_polygon_list(vec![polygon]);
        for line in 0..SCREEN_HEIGHT {
            threaded.draw_scanline(line);
        }

        assert_eq!(*expected.read_framebuffer(), *threaded.read_framebuffer());
    }
}
