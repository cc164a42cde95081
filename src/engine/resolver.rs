use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::actors::{Ghost, Pacman};
use crate::constants::backoff_range_ms;
use crate::grid::Grid;
use crate::level::LevelState;
use crate::rng::Rng;
use crate::types::{Action, Direction, Occupant, Step};

/// Applies movement rules for one actor against the shared grid. Borrowed
/// by a single actor task for the duration of its turn.
pub struct Mover<'a> {
    grid: &'a Grid,
    pacman_alive: &'a AtomicBool,
    rng: &'a mut Rng,
    backoff_ms: u64,
}

impl<'a> Mover<'a> {
    pub fn new(level: &'a LevelState, rng: &'a mut Rng) -> Self {
        Self {
            grid: level.grid(),
            pacman_alive: level.alive_flag(),
            rng,
            backoff_ms: backoff_range_ms(level.tempo().as_millis() as u64),
        }
    }

    #[cfg(test)]
    pub(crate) fn on(grid: &'a Grid, pacman_alive: &'a AtomicBool, rng: &'a mut Rng) -> Self {
        Self {
            grid,
            pacman_alive,
            rng,
            backoff_ms: 1,
        }
    }

    /// Runs a player action that is neither quit nor checkpoint. `scripted`
    /// selects whether the script cursor is advanced.
    pub async fn pacman_action(&mut self, pacman: &mut Pacman, action: Action, scripted: bool) -> Step {
        let dir = match action {
            Action::Move(dir) => dir,
            Action::Random => self.rng.direction(),
            Action::Idle => return Step::Stayed,
            Action::Wait if scripted => {
                pacman.script.tick_wait();
                return Step::Stayed;
            }
            other => {
                warn!(?other, "player command ignored");
                if scripted {
                    pacman.script.advance();
                }
                return Step::Stayed;
            }
        };
        if scripted {
            pacman.script.advance();
        }
        self.pacman_step(pacman, dir).await
    }

    /// Runs the ghost's current script command.
    pub async fn ghost_action(&mut self, ghost: &mut Ghost) -> Step {
        let Some(command) = ghost.script.current() else {
            return Step::Stayed;
        };
        let dir = match command.action {
            Action::Move(dir) => dir,
            Action::Random => self.rng.direction(),
            Action::Wait => {
                ghost.script.tick_wait();
                return Step::Stayed;
            }
            Action::Charge => {
                ghost.script.advance();
                ghost.charged = true;
                return Step::Stayed;
            }
            other => {
                warn!(?other, "ghost command ignored");
                ghost.script.advance();
                return Step::Stayed;
            }
        };
        ghost.script.advance();
        if ghost.charged {
            self.ghost_slide(ghost, dir).await
        } else {
            self.ghost_step(ghost, dir).await
        }
    }

    pub async fn pacman_step(&mut self, pacman: &mut Pacman, dir: Direction) -> Step {
        let to = pacman.pos.offset(dir);
        if !self.grid.contains(to) {
            debug!(from = ?pacman.pos, ?dir, "player move leaves the grid");
            return Step::Rejected;
        }
        let grid = self.grid;
        let mut pair = grid
            .lock_pair(pacman.pos, to, &mut *self.rng, self.backoff_ms)
            .await;

        // A ghost may have eaten the player while it waited for the locks.
        if !self.pacman_alive.load(Ordering::SeqCst) {
            return Step::Stayed;
        }

        if pair.to_portal {
            pair.from.occupant = Occupant::Empty;
            pair.to.occupant = Occupant::Pacman;
            pacman.pos = to;
            debug!(pos = ?to, "player reached the portal");
            return Step::ReachedPortal;
        }

        match pair.to.occupant {
            Occupant::Wall | Occupant::Pacman => Step::Rejected,
            Occupant::Ghost => {
                self.pacman_alive.store(false, Ordering::SeqCst);
                pair.from.occupant = Occupant::Empty;
                debug!(pos = ?to, "player walked into a ghost");
                Step::PacmanKilled
            }
            Occupant::Empty => {
                if pair.to.has_dot {
                    pair.to.has_dot = false;
                    pacman.score += 1;
                }
                pair.from.occupant = Occupant::Empty;
                pair.to.occupant = Occupant::Pacman;
                pacman.pos = to;
                Step::Moved
            }
        }
    }

    pub async fn ghost_step(&mut self, ghost: &mut Ghost, dir: Direction) -> Step {
        let to = ghost.pos.offset(dir);
        ghost.target = Some(to);
        if !self.grid.contains(to) {
            return Step::Rejected;
        }
        let grid = self.grid;
        let mut pair = grid
            .lock_pair(ghost.pos, to, &mut *self.rng, self.backoff_ms)
            .await;

        let step = match pair.to.occupant {
            Occupant::Wall | Occupant::Ghost => return Step::Rejected,
            Occupant::Pacman => {
                self.pacman_alive.store(false, Ordering::SeqCst);
                debug!(pos = ?to, "ghost caught the player");
                Step::PacmanKilled
            }
            Occupant::Empty => Step::Moved,
        };
        pair.from.occupant = Occupant::Empty;
        pair.to.occupant = Occupant::Ghost;
        ghost.pos = to;
        step
    }

    /// Repeats single steps in one direction until blocked or the player is
    /// caught. The charge is spent whatever the result.
    pub async fn ghost_slide(&mut self, ghost: &mut Ghost, dir: Direction) -> Step {
        ghost.charged = false;
        let start = ghost.pos;
        let mut moved = false;
        loop {
            match self.ghost_step(ghost, dir).await {
                Step::Moved => moved = true,
                Step::PacmanKilled => return Step::PacmanKilled,
                _ => break,
            }
        }
        debug!(from = ?start, to = ?ghost.pos, ?dir, "charged slide finished");
        if moved {
            Step::Moved
        } else {
            Step::Rejected
        }
    }
}
