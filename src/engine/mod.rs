//! Session state, the top-level level loop and the turn coordinator.
//!
//! Each level runs one tokio task per actor plus the coordinator, which is
//! the caller of [`Game::play_level`]. A turn is: sleep for the tempo, open
//! the start gate, wait for every actor to finish, translate the play outcome
//! into a level outcome, deliver the next key, render, open the render gate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::constants::RESULT_SCREEN_MS;
use crate::error::Result;
use crate::frontend::{InputSource, Renderer};
use crate::level::LevelState;
use crate::loader::LevelLoader;
use crate::rng::Rng;
use crate::types::{DisplayMode, LevelOutcome, PlayOutcome};

pub(crate) mod actor;
pub mod checkpoint;
pub mod gates;
mod resolver;
mod utils;

use self::actor::{run_actor, ActorId};
use self::checkpoint::{BranchReport, Checkpoint};
use self::utils::{actor_seed, pause};

#[derive(Clone, Debug)]
pub struct GameOptions {
    pub seed: u32,
    /// How long the win and game-over screens stay up.
    pub result_pause: Duration,
    /// Replaces every level's `TEMPO` when set.
    pub tempo_override: Option<Duration>,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            seed: 1,
            result_pause: Duration::from_millis(RESULT_SCREEN_MS),
            tempo_override: None,
        }
    }
}

/// Fields that outlive a single level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub n_levels: usize,
    pub current_level: usize,
    pub levels_cleared: usize,
    pub has_checkpoint: bool,
    pub is_branch: bool,
    pub score: u32,
    pub seed: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub outcome: LevelOutcome,
    pub score: u32,
    pub levels_cleared: usize,
    pub level_count: usize,
    pub last_level: usize,
    /// Every level was cleared, here or in an adopted branch.
    pub completed: bool,
    pub branches: usize,
    pub branch: bool,
}

#[derive(Clone)]
pub struct Game {
    session: Session,
    loader: Arc<dyn LevelLoader>,
    renderer: Arc<dyn Renderer>,
    input: Arc<dyn InputSource>,
    options: GameOptions,
    branches: Arc<AtomicUsize>,
}

impl Game {
    pub fn new(
        loader: Arc<dyn LevelLoader>,
        renderer: Arc<dyn Renderer>,
        input: Arc<dyn InputSource>,
        options: GameOptions,
    ) -> Result<Self> {
        let n_levels = loader.level_count()?;
        info!(levels = n_levels, seed = options.seed, "game created");
        Ok(Self {
            session: Session {
                n_levels,
                current_level: 1,
                seed: options.seed,
                ..Session::default()
            },
            loader,
            renderer,
            input,
            options,
            branches: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Checkpoint branches spawned so far, across every timeline of this game.
    pub fn branch_count(&self) -> usize {
        self.branches.load(Ordering::SeqCst)
    }

    /// Plays levels from the first until one ends the run.
    pub async fn run(self) -> Result<RunSummary> {
        self.run_levels(None).await
    }

    /// The level loop. A branch enters it with the forked level in hand and
    /// carries on through the remaining levels like the original would.
    pub(crate) async fn run_levels(mut self, mut resumed: Option<Arc<LevelState>>) -> Result<RunSummary> {
        let mut outcome = LevelOutcome::Continue;

        while self.session.current_level <= self.session.n_levels {
            let (level, is_resumed) = match resumed.take() {
                Some(level) => (level, true),
                None => match self.load_level() {
                    Ok(level) => (Arc::new(level), false),
                    Err(err) => {
                        error!(level = self.session.current_level, %err, "level failed to load");
                        outcome = LevelOutcome::ForcedQuit;
                        break;
                    }
                },
            };

            outcome = self.play_level(level.clone(), is_resumed).await?;
            let board = level.frame(self.session.is_branch).await;
            debug!(?outcome, "final board\n{board}");

            match outcome {
                LevelOutcome::NextLevel => {
                    self.render(&level, DisplayMode::Win).await;
                    pause(self.options.result_pause).await;
                    self.session.levels_cleared += 1;
                    self.session.current_level += 1;
                }
                LevelOutcome::Quit => {
                    self.render(&level, DisplayMode::GameOver).await;
                    pause(self.options.result_pause).await;
                    break;
                }
                LevelOutcome::ForcedQuit => {
                    info!(branch = self.session.is_branch, "player quit");
                    break;
                }
                LevelOutcome::BranchWon => {
                    info!("a checkpoint branch cleared every level");
                    break;
                }
                LevelOutcome::Continue => {
                    warn!("level ended without an outcome");
                    break;
                }
            }
        }

        let completed = match outcome {
            LevelOutcome::BranchWon => true,
            LevelOutcome::NextLevel => self.session.current_level > self.session.n_levels,
            _ => false,
        };
        let summary = RunSummary {
            outcome,
            score: self.session.score,
            levels_cleared: self.session.levels_cleared,
            level_count: self.session.n_levels,
            last_level: self.session.current_level.min(self.session.n_levels),
            completed,
            branches: self.branch_count(),
            branch: self.session.is_branch,
        };
        info!(?summary, "run finished");
        Ok(summary)
    }

    /// Loads the current level with the score carried so far. A fresh level
    /// may take a new checkpoint.
    pub fn load_level(&mut self) -> Result<LevelState> {
        let index = self.session.current_level;
        self.session.has_checkpoint = false;
        let mut data = self.loader.load(index)?;
        if let Some(tempo) = self.options.tempo_override {
            data.tempo = tempo;
        }
        let level = LevelState::new(index, data, self.session.score)?;
        info!(
            level = index,
            ghosts = level.ghosts().len(),
            tempo_ms = level.tempo().as_millis() as u64,
            branch = self.session.is_branch,
            "level loaded"
        );
        Ok(level)
    }

    /// Runs one level to completion and returns its outcome. `resumed` marks
    /// a level forked at a checkpoint, which skips the opening render.
    pub async fn play_level(&mut self, level: Arc<LevelState>, resumed: bool) -> Result<LevelOutcome> {
        let closer = level.gates().close_on_drop();
        let actors = self.spawn_actors(&level);
        if !resumed {
            self.render(&level, DisplayMode::Menu).await;
        }

        let result = self.coordinate(&level).await;
        if result.is_err() {
            level.gates().close();
        }
        for joined in join_all(actors).await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(%err, "actor task ended early"),
                Err(err) => error!(%err, "actor task failed"),
            }
        }
        drop(closer);

        let (outcome, adopted) = result?;
        match adopted {
            Some(report) if !report.outcome.is_continue() => self.adopt(report),
            _ => self.session.score = level.score().await,
        }
        Ok(outcome)
    }

    fn spawn_actors(&self, level: &Arc<LevelState>) -> Vec<JoinHandle<Result<()>>> {
        let seed = self.session.seed;
        let index = level.index();
        let mut handles = Vec::with_capacity(level.actor_count());
        handles.push(tokio::spawn(run_actor(
            level.clone(),
            ActorId::Pacman,
            Rng::new(actor_seed(seed, index, 0)),
        )));
        for ghost in 0..level.ghosts().len() {
            handles.push(tokio::spawn(run_actor(
                level.clone(),
                ActorId::Ghost(ghost),
                Rng::new(actor_seed(seed, index, ghost + 1)),
            )));
        }
        handles
    }

    async fn coordinate(
        &mut self,
        level: &Arc<LevelState>,
    ) -> Result<(LevelOutcome, Option<BranchReport>)> {
        let gates = level.gates();
        let actors = level.actor_count();
        let mut adopted = None;
        let mut turn = 0u64;

        loop {
            pause(level.tempo()).await;
            turn += 1;
            gates.open_turn(actors);
            gates.collect_finished(actors).await?;

            // Every actor is parked on the render gate from here on.
            let play = level.play_outcome().await;
            let outcome = match play {
                PlayOutcome::Continue => LevelOutcome::Continue,
                PlayOutcome::ReachedPortal => LevelOutcome::NextLevel,
                PlayOutcome::PacmanDied => LevelOutcome::Quit,
                PlayOutcome::QuitRequested => LevelOutcome::ForcedQuit,
                PlayOutcome::CheckpointRequested => {
                    level.set_play_outcome(PlayOutcome::Continue).await;
                    match self.create_checkpoint(level).await {
                        Ok(Checkpoint::AlreadyTaken) => LevelOutcome::Continue,
                        Ok(Checkpoint::Restored(report)) => {
                            adopted = Some(report);
                            report.outcome
                        }
                        Err(err) => {
                            error!(level = level.index(), %err, "checkpoint failed");
                            LevelOutcome::ForcedQuit
                        }
                    }
                }
            };
            if play != PlayOutcome::Continue {
                debug!(turn, ?play, ?outcome, "turn outcome");
            }
            level.set_level_outcome(outcome).await;

            let key = self.input.poll_key();
            level.pacman().lock().await.key = key;
            self.render(level, DisplayMode::Menu).await;
            gates.release_render(actors);

            if !outcome.is_continue() {
                info!(
                    level = level.index(),
                    turn,
                    ?outcome,
                    branch = self.session.is_branch,
                    "level finished"
                );
                return Ok((outcome, adopted));
            }
        }
    }

    /// Takes over the finished branch's result as this timeline's own.
    fn adopt(&mut self, report: BranchReport) {
        debug!(?report, "adopting branch result");
        self.session.score = report.score;
        self.session.current_level = report.current_level;
        self.session.levels_cleared = report.levels_cleared;
    }

    async fn render(&self, level: &LevelState, mode: DisplayMode) {
        let frame = level.frame(self.session.is_branch).await;
        self.renderer.render(&frame, mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::{Ghost, Pacman, Script};
    use crate::frontend::{NoInput, NullRenderer, RecordingRenderer, ScriptedInput};
    use crate::grid::{GridLayout, Tile};
    use crate::level::LevelData;
    use crate::loader::MemoryLoader;
    use crate::types::{Action, Command, Direction, Frame, Vec2, GLYPH_PACMAN};

    fn quick_options() -> GameOptions {
        GameOptions {
            seed: 11,
            result_pause: Duration::ZERO,
            tempo_override: Some(Duration::ZERO),
        }
    }

    fn manual(pos: Vec2) -> Pacman {
        Pacman::new(pos, 0, Script::default())
    }

    fn standing_ghost(pos: Vec2) -> Ghost {
        Ghost::new(pos, 0, Script::new(vec![Command::wait(1_000)]))
    }

    fn data(layout: GridLayout, pacman: Pacman, ghosts: Vec<Ghost>) -> LevelData {
        LevelData {
            layout,
            tempo: Duration::ZERO,
            pacman,
            ghosts,
        }
    }

    fn game(loader: MemoryLoader, renderer: Arc<RecordingRenderer>, keys: &str) -> Game {
        Game::new(
            Arc::new(loader),
            renderer,
            Arc::new(ScriptedInput::parse(keys)),
            quick_options(),
        )
        .expect("game builds")
    }

    async fn within<T>(future: impl std::future::Future<Output = T>) -> T {
        tokio::time::timeout(Duration::from_secs(30), future)
            .await
            .expect("game should not stall")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn player_steps_right_on_empty_grid() {
        let loader = MemoryLoader::new().with_data(
            1,
            data(GridLayout::new(5, 5), manual(Vec2::new(0, 0)), Vec::new()),
        );
        let renderer = Arc::new(RecordingRenderer::new());
        let mut game = game(loader, renderer.clone(), "DQ");
        let level = Arc::new(game.load_level().expect("loads"));

        let outcome = within(game.play_level(level.clone(), false))
            .await
            .expect("level runs");
        assert_eq!(outcome, LevelOutcome::ForcedQuit);

        // Opening render, then one frame per turn.
        let frames = renderer.frames();
        let after_move = &frames[2].1;
        assert_eq!(after_move.glyph_at(Vec2::new(1, 0)), Some(GLYPH_PACMAN));
        assert_eq!(after_move.score, 0);
        assert_eq!(level.pacman().lock().await.pos, Vec2::new(1, 0));
        assert!(level.occupancy_errors().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn player_eats_dot() {
        let mut layout = GridLayout::new(5, 1);
        *layout.tile_mut(Vec2::new(2, 0)) = Tile::dot();
        let loader =
            MemoryLoader::new().with_data(1, data(layout, manual(Vec2::new(1, 0)), Vec::new()));
        let renderer = Arc::new(RecordingRenderer::new());
        let mut game = game(loader, renderer.clone(), "DQ");
        let level = Arc::new(game.load_level().expect("loads"));

        within(game.play_level(level.clone(), false))
            .await
            .expect("level runs");
        assert_eq!(level.pacman().lock().await.pos, Vec2::new(2, 0));
        assert_eq!(level.score().await, 1);
        assert_eq!(game.session().score, 1);
        assert!(!level.grid().cell(Vec2::new(2, 0)).read().await.has_dot);
        assert_eq!(renderer.frames()[2].1.score, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn walking_into_a_ghost_ends_the_level_in_quit() {
        let loader = MemoryLoader::new().with_data(
            1,
            data(
                GridLayout::new(3, 1),
                manual(Vec2::new(0, 0)),
                vec![standing_ghost(Vec2::new(1, 0))],
            ),
        );
        let renderer = Arc::new(RecordingRenderer::new());
        let mut game = game(loader, renderer.clone(), "D");
        let level = Arc::new(game.load_level().expect("loads"));

        let outcome = within(game.play_level(level.clone(), false))
            .await
            .expect("level runs");
        assert_eq!(outcome, LevelOutcome::Quit);
        assert_eq!(level.play_outcome().await, PlayOutcome::PacmanDied);
        assert!(!level.pacman_alive());
        assert_eq!(level.ghosts()[0].lock().await.pos, Vec2::new(1, 0));
        assert!(level.occupancy_errors().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn checkpoint_branch_win_is_adopted() {
        let mut layout = GridLayout::new(3, 1);
        *layout.tile_mut(Vec2::new(1, 0)) = Tile::portal();
        let loader =
            MemoryLoader::new().with_data(1, data(layout, manual(Vec2::new(0, 0)), Vec::new()));
        let renderer = Arc::new(RecordingRenderer::new());
        // The original asks for a checkpoint; the branch starts without a
        // key, then walks onto the portal.
        let game = game(loader, renderer.clone(), "GD");

        let summary = within(game.run()).await.expect("run finishes");
        assert_eq!(summary.outcome, LevelOutcome::BranchWon);
        assert!(summary.completed);
        assert_eq!(summary.branches, 1);
        assert!(!summary.branch);
        assert_eq!(summary.levels_cleared, 1);
        assert!(renderer.frames().iter().any(|(_, frame)| frame.branch));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn dying_in_a_branch_rewinds_to_the_checkpoint() {
        let loader = MemoryLoader::new().with_data(
            1,
            data(
                GridLayout::new(3, 1),
                manual(Vec2::new(0, 0)),
                vec![standing_ghost(Vec2::new(1, 0))],
            ),
        );
        let renderer = Arc::new(RecordingRenderer::new());
        // The branch walks into the ghost and still reads one key after the
        // fatal turn, so the original's quit comes one key later.
        let game = game(loader, renderer.clone(), "GD.Q");

        let summary = within(game.run()).await.expect("run finishes");
        assert_eq!(summary.outcome, LevelOutcome::ForcedQuit);
        assert_eq!(summary.branches, 1);

        let frames = renderer.frames();
        assert!(frames
            .iter()
            .any(|(mode, frame)| frame.branch && *mode == DisplayMode::GameOver));
        let (_, last) = frames.last().expect("frames rendered");
        assert!(!last.branch);
        assert!(last.alive);
        assert_eq!(last.glyph_at(Vec2::new(0, 0)), Some(GLYPH_PACMAN));
        assert_eq!(last.glyph_at(Vec2::new(1, 0)), Some('M'));
    }

    /// Renders normally until handed a frame from a checkpoint branch.
    #[derive(Default)]
    struct BranchCrashRenderer {
        inner: RecordingRenderer,
    }

    impl Renderer for BranchCrashRenderer {
        fn render(&self, frame: &Frame, mode: DisplayMode) {
            assert!(!frame.branch, "branch renderer crashed");
            self.inner.render(frame, mode);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_branch_forces_quit() {
        let loader = MemoryLoader::new().with_data(
            1,
            data(GridLayout::new(3, 1), manual(Vec2::new(0, 0)), Vec::new()),
        );
        let renderer = Arc::new(BranchCrashRenderer::default());
        let game = Game::new(
            Arc::new(loader),
            renderer.clone(),
            Arc::new(ScriptedInput::parse("G....").quit_when_exhausted()),
            quick_options(),
        )
        .expect("game builds");

        let summary = within(game.run()).await.expect("run finishes");
        assert_eq!(summary.outcome, LevelOutcome::ForcedQuit);
        assert_eq!(summary.branches, 1);
        assert_eq!(summary.levels_cleared, 0);
        assert!(renderer.inner.frames().iter().all(|(_, frame)| !frame.branch));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn score_carries_into_the_next_level() {
        let mut first = GridLayout::new(3, 1);
        *first.tile_mut(Vec2::new(1, 0)) = Tile::dot();
        *first.tile_mut(Vec2::new(2, 0)) = Tile::portal();
        let runner = Pacman::new(
            Vec2::new(0, 0),
            0,
            Script::new(vec![Command::new(Action::Move(Direction::Right))]),
        );
        let mut second = GridLayout::new(2, 1);
        *second.tile_mut(Vec2::new(1, 0)) = Tile::portal();
        let finisher = Pacman::new(
            Vec2::new(0, 0),
            0,
            Script::new(vec![Command::new(Action::Move(Direction::Right))]),
        );
        let loader = MemoryLoader::new()
            .with_data(1, data(first, runner, Vec::new()))
            .with_data(2, data(second, finisher, Vec::new()));
        let renderer = Arc::new(RecordingRenderer::new());
        let game = game(loader, renderer.clone(), "");

        let summary = within(game.run()).await.expect("run finishes");
        assert_eq!(summary.outcome, LevelOutcome::NextLevel);
        assert!(summary.completed);
        assert_eq!(summary.levels_cleared, 2);
        assert_eq!(summary.score, 1);
        assert_eq!(summary.branches, 0);
        let wins = renderer
            .frames()
            .iter()
            .filter(|(mode, _)| *mode == DisplayMode::Win)
            .count();
        assert_eq!(wins, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn broken_level_forces_quit() {
        let loader = MemoryLoader::new().with_level(1, "TEMPO 10\n");
        let game = Game::new(
            Arc::new(loader),
            Arc::new(NullRenderer),
            Arc::new(NoInput),
            quick_options(),
        )
        .expect("level count is known");
        let summary = within(game.run()).await.expect("run finishes");
        assert_eq!(summary.outcome, LevelOutcome::ForcedQuit);
        assert_eq!(summary.levels_cleared, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ghost_swarm_keeps_the_grid_consistent() {
        // Dense board of charging, wandering ghosts around a player that
        // quits after a while. Every rendered frame must stay consistent.
        let width = 7;
        let mut ghosts = Vec::new();
        for y in 0..width {
            for x in 0..width {
                if (x + y) % 2 == 1 && ghosts.len() < 24 {
                    let script = Script::new(vec![
                        Command::new(Action::Random),
                        Command::new(Action::Charge),
                        Command::new(Action::Random),
                        Command::new(Action::Move(Direction::Up)),
                    ]);
                    ghosts.push(Ghost::new(Vec2::new(x, y), 0, script));
                }
            }
        }
        let ghost_count = ghosts.len();
        let loader = MemoryLoader::new().with_data(
            1,
            data(GridLayout::new(width, width), manual(Vec2::new(0, 0)), ghosts),
        );
        let renderer = Arc::new(RecordingRenderer::new());
        let keys = format!("{}Q", ".".repeat(40));
        let mut game = game(loader, renderer.clone(), &keys);
        let level = Arc::new(game.load_level().expect("loads"));

        let outcome = within(game.play_level(level.clone(), false))
            .await
            .expect("level runs");
        assert!(matches!(outcome, LevelOutcome::ForcedQuit | LevelOutcome::Quit));
        for (_, frame) in renderer.frames() {
            assert_eq!(frame.count('M'), ghost_count);
            assert!(frame.count(GLYPH_PACMAN) <= 1);
            assert_eq!(frame.count(GLYPH_PACMAN) == 1, frame.alive);
        }
        assert!(level.occupancy_errors().await.is_empty());
    }
}
