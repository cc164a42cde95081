use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::actors::{Ghost, Pacman};
use crate::constants::{MAX_GHOSTS, MAX_GRID_CELLS};
use crate::engine::gates::TurnGates;
use crate::error::{GameError, Result};
use crate::grid::{cell_count, Grid, GridLayout};
use crate::types::{Frame, LevelOutcome, Occupant, PlayOutcome, Vec2};

/// What a loader hands over: the static map and the actors' starting state.
#[derive(Clone, Debug)]
pub struct LevelData {
    pub layout: GridLayout,
    pub tempo: Duration,
    pub pacman: Pacman,
    pub ghosts: Vec<Ghost>,
}

/// A level in play. Shared by the coordinator and every actor task.
#[derive(Debug)]
pub struct LevelState {
    index: usize,
    tempo: Duration,
    grid: Grid,
    pacman: Mutex<Pacman>,
    pacman_alive: AtomicBool,
    ghosts: Vec<Mutex<Ghost>>,
    play_outcome: RwLock<PlayOutcome>,
    level_outcome: RwLock<LevelOutcome>,
    gates: TurnGates,
}

impl LevelState {
    pub fn new(index: usize, data: LevelData, points: u32) -> Result<Self> {
        let LevelData {
            mut layout,
            tempo,
            mut pacman,
            ghosts,
        } = data;

        if layout.width <= 0 || layout.height <= 0 {
            return Err(GameError::invalid_level(index, "grid has no cells"));
        }
        let Some(cells) = cell_count(layout.width, layout.height).filter(|&n| n <= MAX_GRID_CELLS)
        else {
            return Err(GameError::invalid_level(index, "DIM too large"));
        };
        if layout.tiles.len() != cells {
            return Err(GameError::invalid_level(index, "tile count does not match DIM"));
        }
        if ghosts.len() > MAX_GHOSTS {
            return Err(GameError::invalid_level(
                index,
                format!("{} ghosts, at most {MAX_GHOSTS} allowed", ghosts.len()),
            ));
        }

        place(&mut layout, index, pacman.pos, Occupant::Pacman)?;
        for ghost in &ghosts {
            place(&mut layout, index, ghost.pos, Occupant::Ghost)?;
        }
        pacman.score = points;

        debug!(
            level = index,
            width = layout.width,
            height = layout.height,
            ghosts = ghosts.len(),
            tempo_ms = tempo.as_millis() as u64,
            "level state built"
        );

        Ok(Self {
            index,
            tempo,
            grid: Grid::from_layout(&layout),
            pacman: Mutex::new(pacman),
            pacman_alive: AtomicBool::new(true),
            ghosts: ghosts.into_iter().map(Mutex::new).collect(),
            play_outcome: RwLock::new(PlayOutcome::Continue),
            level_outcome: RwLock::new(LevelOutcome::Continue),
            gates: TurnGates::new(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn tempo(&self) -> Duration {
        self.tempo
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn pacman(&self) -> &Mutex<Pacman> {
        &self.pacman
    }

    pub fn ghosts(&self) -> &[Mutex<Ghost>] {
        &self.ghosts
    }

    pub fn pacman_alive(&self) -> bool {
        self.pacman_alive.load(Ordering::SeqCst)
    }

    pub(crate) fn alive_flag(&self) -> &AtomicBool {
        &self.pacman_alive
    }

    pub(crate) fn gates(&self) -> &TurnGates {
        &self.gates
    }

    /// Player plus ghosts; the number of permits each gate hands out per turn.
    pub fn actor_count(&self) -> usize {
        1 + self.ghosts.len()
    }

    pub async fn play_outcome(&self) -> PlayOutcome {
        *self.play_outcome.read().await
    }

    pub async fn set_play_outcome(&self, outcome: PlayOutcome) {
        *self.play_outcome.write().await = outcome;
    }

    /// Records a checkpoint request unless another result is already pending.
    pub async fn request_checkpoint(&self) -> bool {
        let mut pending = self.play_outcome.write().await;
        if *pending != PlayOutcome::Continue {
            return false;
        }
        *pending = PlayOutcome::CheckpointRequested;
        true
    }

    pub async fn level_outcome(&self) -> LevelOutcome {
        *self.level_outcome.read().await
    }

    pub async fn set_level_outcome(&self, outcome: LevelOutcome) {
        *self.level_outcome.write().await = outcome;
    }

    pub async fn score(&self) -> u32 {
        self.pacman.lock().await.score
    }

    pub async fn frame(&self, branch: bool) -> Frame {
        let layout = self.grid.layout().await;
        Frame {
            level: self.index,
            width: layout.width,
            height: layout.height,
            rows: layout.rows(),
            score: self.score().await,
            alive: self.pacman_alive(),
            branch,
        }
    }

    /// Independent copy for a checkpoint branch: same grid and actors, fresh
    /// gates, both outcomes back to continue and no pending key.
    pub async fn fork(&self) -> Self {
        let layout = self.grid.layout().await;
        let mut pacman = self.pacman.lock().await.clone();
        pacman.key = None;
        let mut ghosts = Vec::with_capacity(self.ghosts.len());
        for ghost in &self.ghosts {
            ghosts.push(Mutex::new(ghost.lock().await.clone()));
        }
        Self {
            index: self.index,
            tempo: self.tempo,
            grid: Grid::from_layout(&layout),
            pacman: Mutex::new(pacman),
            pacman_alive: AtomicBool::new(self.pacman_alive()),
            ghosts,
            play_outcome: RwLock::new(PlayOutcome::Continue),
            level_outcome: RwLock::new(LevelOutcome::Continue),
            gates: TurnGates::new(),
        }
    }

    /// Cross-checks actor positions against cell occupants. Empty when the
    /// grid is consistent.
    pub async fn occupancy_errors(&self) -> Vec<String> {
        let layout = self.grid.layout().await;
        let mut errors = Vec::new();

        let pacman_cells = layout
            .tiles
            .iter()
            .filter(|tile| tile.occupant == Occupant::Pacman)
            .count();
        let alive = self.pacman_alive();
        if pacman_cells != alive as usize {
            errors.push(format!(
                "{pacman_cells} player cells with alive={alive}"
            ));
        }
        if alive {
            let pos = self.pacman.lock().await.pos;
            if layout.tile(pos).occupant != Occupant::Pacman {
                errors.push(format!("player at {pos:?} but cell holds {:?}", layout.tile(pos).occupant));
            }
        }

        let ghost_cells = layout
            .tiles
            .iter()
            .filter(|tile| tile.occupant == Occupant::Ghost)
            .count();
        if ghost_cells != self.ghosts.len() {
            errors.push(format!(
                "{ghost_cells} ghost cells for {} ghosts",
                self.ghosts.len()
            ));
        }
        let mut seen: HashSet<Vec2> = HashSet::new();
        for (idx, ghost) in self.ghosts.iter().enumerate() {
            let pos = ghost.lock().await.pos;
            if !seen.insert(pos) {
                errors.push(format!("ghost {idx} shares {pos:?}"));
            }
            if layout.tile(pos).occupant != Occupant::Ghost {
                errors.push(format!(
                    "ghost {idx} at {pos:?} but cell holds {:?}",
                    layout.tile(pos).occupant
                ));
            }
        }
        errors
    }
}

fn place(layout: &mut GridLayout, level: usize, pos: Vec2, occupant: Occupant) -> Result<()> {
    if !layout.contains(pos) {
        return Err(GameError::invalid_level(
            level,
            format!("{occupant:?} starts outside the grid at {pos:?}"),
        ));
    }
    let tile = layout.tile_mut(pos);
    if tile.occupant != Occupant::Empty {
        return Err(GameError::invalid_level(
            level,
            format!("{occupant:?} starts on {:?} at {pos:?}", tile.occupant),
        ));
    }
    tile.occupant = occupant;
    Ok(())
}
