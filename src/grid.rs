//! Shared grid with one reader/writer lock per cell.
//!
//! Nothing here decides game rules. Callers take a cell's lock, look at the
//! occupant and dot, and write them back while the guard is alive. A move
//! needs two cells, which [`Grid::lock_pair`] acquires without a global lock
//! order: the current cell is awaited, the target is only tried, and on
//! contention the first guard is dropped and the task backs off.

use std::time::Duration;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use crate::rng::Rng;
use crate::types::{
    Occupant, Vec2, GLYPH_DOT, GLYPH_EMPTY, GLYPH_GHOST, GLYPH_PACMAN, GLYPH_PORTAL, GLYPH_WALL,
};

/// The lock-guarded part of a cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellState {
    pub occupant: Occupant,
    pub has_dot: bool,
}

/// Plain-data cell used by loaders, snapshots and forks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tile {
    pub occupant: Occupant,
    pub has_dot: bool,
    pub has_portal: bool,
}

impl Tile {
    pub fn wall() -> Self {
        Self {
            occupant: Occupant::Wall,
            ..Self::default()
        }
    }

    pub fn dot() -> Self {
        Self {
            has_dot: true,
            ..Self::default()
        }
    }

    pub fn portal() -> Self {
        Self {
            has_portal: true,
            ..Self::default()
        }
    }

    pub fn glyph(&self) -> char {
        match self.occupant {
            Occupant::Wall => GLYPH_WALL,
            Occupant::Pacman => GLYPH_PACMAN,
            Occupant::Ghost => GLYPH_GHOST,
            Occupant::Empty if self.has_portal => GLYPH_PORTAL,
            Occupant::Empty if self.has_dot => GLYPH_DOT,
            Occupant::Empty => GLYPH_EMPTY,
        }
    }
}

/// `width * height`, or `None` for negative sizes or an overflowing product.
pub fn cell_count(width: i32, height: i32) -> Option<usize> {
    let width = usize::try_from(width).ok()?;
    let height = usize::try_from(height).ok()?;
    width.checked_mul(height)
}

/// Unlocked row-major image of a grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridLayout {
    pub width: i32,
    pub height: i32,
    pub tiles: Vec<Tile>,
}

impl GridLayout {
    pub fn new(width: i32, height: i32) -> Self {
        let len = cell_count(width.max(0), height.max(0)).unwrap_or(0);
        Self {
            width,
            height,
            tiles: vec![Tile::default(); len],
        }
    }

    pub fn contains(&self, pos: Vec2) -> bool {
        pos.x >= 0 && pos.x < self.width && pos.y >= 0 && pos.y < self.height
    }

    pub fn index(&self, pos: Vec2) -> usize {
        (pos.y * self.width + pos.x) as usize
    }

    pub fn tile(&self, pos: Vec2) -> &Tile {
        &self.tiles[self.index(pos)]
    }

    pub fn tile_mut(&mut self, pos: Vec2) -> &mut Tile {
        let index = self.index(pos);
        &mut self.tiles[index]
    }

    pub fn rows(&self) -> Vec<String> {
        self.tiles
            .chunks(self.width.max(1) as usize)
            .map(|row| row.iter().map(Tile::glyph).collect())
            .collect()
    }
}

#[derive(Debug)]
pub struct Cell {
    state: RwLock<CellState>,
    has_portal: bool,
}

impl Cell {
    fn new(tile: &Tile) -> Self {
        Self {
            state: RwLock::new(CellState {
                occupant: tile.occupant,
                has_dot: tile.has_dot,
            }),
            has_portal: tile.has_portal,
        }
    }

    /// Set at load time and never changed, so it is readable without the lock.
    pub fn has_portal(&self) -> bool {
        self.has_portal
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, CellState> {
        self.state.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, CellState> {
        self.state.write().await
    }

    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, CellState>> {
        self.state.try_write().ok()
    }
}

/// Write guards on the mover's cell and its target. Dropping the pair
/// releases both.
pub struct CellPair<'a> {
    pub from: RwLockWriteGuard<'a, CellState>,
    pub to: RwLockWriteGuard<'a, CellState>,
    pub to_portal: bool,
    pub retries: u32,
}

#[derive(Debug)]
pub struct Grid {
    width: i32,
    height: i32,
    cells: Vec<Cell>,
}

impl Grid {
    pub fn from_layout(layout: &GridLayout) -> Self {
        Self {
            width: layout.width,
            height: layout.height,
            cells: layout.tiles.iter().map(Cell::new).collect(),
        }
    }

    pub fn contains(&self, pos: Vec2) -> bool {
        pos.x >= 0 && pos.x < self.width && pos.y >= 0 && pos.y < self.height
    }

    /// Panics when `pos` is outside the grid; check [`Grid::contains`] first.
    pub fn cell(&self, pos: Vec2) -> &Cell {
        debug_assert!(self.contains(pos), "cell {pos:?} outside grid");
        &self.cells[(pos.y * self.width + pos.x) as usize]
    }

    /// Locks `from` then tries `to`. While `to` is busy the `from` guard is
    /// released and the task sleeps a random delay below
    /// `retries * backoff_ms`, then starts over.
    pub async fn lock_pair(
        &self,
        from: Vec2,
        to: Vec2,
        rng: &mut Rng,
        backoff_ms: u64,
    ) -> CellPair<'_> {
        let source = self.cell(from);
        let target = self.cell(to);
        let mut retries = 0u32;
        loop {
            let from_guard = source.write().await;
            if let Some(to_guard) = target.try_write() {
                return CellPair {
                    from: from_guard,
                    to: to_guard,
                    to_portal: target.has_portal(),
                    retries,
                };
            }
            drop(from_guard);
            retries += 1;
            let delay = rng.below(retries as u64 * backoff_ms);
            trace!(?from, ?to, retries, delay, "target cell busy, backing off");
            if delay == 0 {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }

    /// Copies every cell under its read lock.
    pub async fn layout(&self) -> GridLayout {
        let mut tiles = Vec::with_capacity(self.cells.len());
        for cell in &self.cells {
            let state = *cell.read().await;
            tiles.push(Tile {
                occupant: state.occupant,
                has_dot: state.has_dot,
                has_portal: cell.has_portal(),
            });
        }
        GridLayout {
            width: self.width,
            height: self.height,
            tiles,
        }
    }
}
