use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::level::LevelState;
use crate::rng::Rng;
use crate::types::{Action, PlayOutcome};

use super::resolver::Mover;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ActorId {
    Pacman,
    Ghost(usize),
}

/// Body of one actor task: wait for turn start, act once, report, then wait
/// for the render to finish before checking whether the level is over.
pub(crate) async fn run_actor(level: Arc<LevelState>, actor: ActorId, mut rng: Rng) -> Result<()> {
    let gates = level.gates();
    loop {
        gates.await_turn().await?;
        match actor {
            ActorId::Pacman => pacman_turn(&level, &mut rng).await,
            ActorId::Ghost(index) => ghost_turn(&level, index, &mut rng).await,
        }
        gates.finish_turn();
        gates.await_render().await?;

        let outcome = level.level_outcome().await;
        if !outcome.is_continue() {
            debug!(?actor, ?outcome, "actor task exiting");
            return Ok(());
        }
    }
}

pub(crate) async fn pacman_turn(level: &LevelState, rng: &mut Rng) {
    if !level.pacman_alive() {
        return;
    }
    let mut pacman = level.pacman().lock().await;
    if !pacman.pace.ready() {
        return;
    }

    let scripted = !pacman.is_manual();
    let action = if scripted {
        pacman
            .script
            .current()
            .map(|command| command.action)
            .unwrap_or(Action::Idle)
    } else {
        Action::from_key(pacman.key)
    };

    if !scripted {
        match action {
            Action::Checkpoint => {
                if level.request_checkpoint().await {
                    info!(level = level.index(), "checkpoint requested");
                }
                return;
            }
            Action::Quit => {
                level.set_play_outcome(PlayOutcome::QuitRequested).await;
                return;
            }
            _ => {}
        }
    }

    let step = Mover::new(level, rng)
        .pacman_action(&mut pacman, action, scripted)
        .await;
    debug!(?action, ?step, pos = ?pacman.pos, "player turn");
    if let Some(outcome) = step.play_outcome() {
        level.set_play_outcome(outcome).await;
    }
}

pub(crate) async fn ghost_turn(level: &LevelState, index: usize, rng: &mut Rng) {
    let mut ghost = level.ghosts()[index].lock().await;
    if !ghost.pace.ready() {
        return;
    }
    let step = Mover::new(level, rng).ghost_action(&mut ghost).await;
    debug!(ghost = index, ?step, pos = ?ghost.pos, "ghost turn");
    if let Some(outcome) = step.play_outcome() {
        level.set_play_outcome(outcome).await;
    }
}
