//! Checkpoints as branched timelines.
//!
//! Taking a checkpoint forks the level into an independent copy and runs the
//! rest of the game on it in a new task, starting from the turn after the
//! request. The original timeline waits for the branch to finish and takes
//! its result: a branch that died reports `Continue`, which rewinds the
//! original to the checkpoint.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{GameError, Result};
use crate::level::LevelState;
use crate::types::LevelOutcome;

use super::utils::branch_seed;
use super::Game;

/// What a finished branch hands back to the timeline that forked it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BranchReport {
    pub outcome: LevelOutcome,
    pub score: u32,
    pub current_level: usize,
    pub levels_cleared: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Checkpoint {
    /// This level already has a checkpoint; nothing was forked.
    AlreadyTaken,
    /// The branch ran to completion.
    Restored(BranchReport),
}

impl Game {
    /// Forks `level` into a branch and blocks until the branch ends.
    /// At most one checkpoint is taken per level.
    pub async fn create_checkpoint(&mut self, level: &LevelState) -> Result<Checkpoint> {
        if self.session.has_checkpoint {
            debug!(level = level.index(), "checkpoint already taken for this level");
            return Ok(Checkpoint::AlreadyTaken);
        }
        self.session.has_checkpoint = true;

        let (number, handle) = self.spawn_branch(level).await?;
        info!(level = level.index(), branch = number, "checkpoint taken, branch running");

        let report = handle
            .await
            .map_err(|err| GameError::CheckpointFailed(format!("branch {number} task failed: {err}")))?
            .map_err(|err| GameError::CheckpointFailed(format!("branch {number} ended with error: {err}")))?;
        info!(branch = number, ?report, "branch finished");
        Ok(Checkpoint::Restored(report))
    }

    async fn spawn_branch(
        &self,
        level: &LevelState,
    ) -> Result<(usize, JoinHandle<Result<BranchReport>>)> {
        let runtime = Handle::try_current()
            .map_err(|err| GameError::CheckpointFailed(format!("no runtime for the branch: {err}")))?;

        let number = self.branches.fetch_add(1, Ordering::SeqCst) + 1;
        let mut branch = self.clone();
        branch.session.is_branch = true;
        branch.session.seed = branch_seed(self.session.seed, number);
        let fork = Arc::new(level.fork().await);

        Ok((number, runtime.spawn(run_branch(branch, fork))))
    }
}

/// Boxed so the level loop can start a branch of itself.
fn run_branch(game: Game, level: Arc<LevelState>) -> BoxFuture<'static, Result<BranchReport>> {
    async move {
        let summary = game.run_levels(Some(level)).await?;
        let report = BranchReport {
            outcome: summary.outcome.branch_exit(summary.completed),
            score: summary.score,
            current_level: summary.last_level + summary.completed as usize,
            levels_cleared: summary.levels_cleared,
        };
        Ok(report)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::actors::{Ghost, Pacman, Script};
    use crate::engine::GameOptions;
    use crate::frontend::{NullRenderer, ScriptedInput};
    use crate::grid::{GridLayout, Tile};
    use crate::level::LevelData;
    use crate::loader::MemoryLoader;
    use crate::types::{Action, Command, Direction, Vec2};

    fn game_with(data: LevelData, keys: &str) -> Game {
        Game::new(
            Arc::new(MemoryLoader::new().with_data(1, data)),
            Arc::new(NullRenderer),
            Arc::new(ScriptedInput::parse(keys)),
            GameOptions {
                seed: 3,
                result_pause: Duration::ZERO,
                tempo_override: Some(Duration::ZERO),
            },
        )
        .expect("game builds")
    }

    fn portal_level() -> LevelData {
        let mut layout = GridLayout::new(3, 1);
        *layout.tile_mut(Vec2::new(1, 0)) = Tile::portal();
        LevelData {
            layout,
            tempo: Duration::ZERO,
            pacman: Pacman::new(Vec2::new(0, 0), 0, Script::default()),
            ghosts: Vec::new(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_checkpoint_in_a_level_is_a_no_op() {
        let mut game = game_with(portal_level(), "D");
        let level = game.load_level().expect("loads");

        let first = game.create_checkpoint(&level).await.expect("branch runs");
        let Checkpoint::Restored(report) = first else {
            panic!("first checkpoint should fork, got {first:?}");
        };
        assert_eq!(report.outcome, LevelOutcome::BranchWon);
        assert_eq!(game.branch_count(), 1);

        let second = game.create_checkpoint(&level).await.expect("no-op");
        assert_eq!(second, Checkpoint::AlreadyTaken);
        assert_eq!(game.branch_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn branch_death_leaves_the_original_untouched() {
        let ghost = Ghost::new(
            Vec2::new(2, 0),
            0,
            Script::new(vec![Command::new(Action::Move(Direction::Left))]),
        );
        let data = LevelData {
            layout: GridLayout::new(3, 1),
            tempo: Duration::ZERO,
            pacman: Pacman::new(Vec2::new(0, 0), 0, Script::default()),
            ghosts: vec![ghost],
        };
        let mut game = game_with(data, "");
        let level = game.load_level().expect("loads");

        let outcome = game.create_checkpoint(&level).await.expect("branch runs");
        let Checkpoint::Restored(report) = outcome else {
            panic!("expected a branch report, got {outcome:?}");
        };
        assert_eq!(report.outcome, LevelOutcome::Continue);

        assert!(level.pacman_alive());
        assert_eq!(level.ghosts()[0].lock().await.pos, Vec2::new(2, 0));
        assert!(level.occupancy_errors().await.is_empty());
        assert!(game.session().has_checkpoint);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loading_a_level_rearms_the_checkpoint() {
        let mut game = game_with(portal_level(), "");
        game.session.has_checkpoint = true;
        game.load_level().expect("loads");
        assert!(!game.session().has_checkpoint);
    }
}
