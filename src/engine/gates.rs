use tokio::sync::Semaphore;

use crate::error::Result;

/// The three counting gates that lock-step actor tasks with the coordinator:
/// turn start, turn finished and render complete.
#[derive(Debug)]
pub struct TurnGates {
    turn_start: Semaphore,
    turn_finished: Semaphore,
    render_complete: Semaphore,
}

impl Default for TurnGates {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnGates {
    pub fn new() -> Self {
        Self {
            turn_start: Semaphore::new(0),
            turn_finished: Semaphore::new(0),
            render_complete: Semaphore::new(0),
        }
    }

    pub fn open_turn(&self, actors: usize) {
        self.turn_start.add_permits(actors);
    }

    pub async fn await_turn(&self) -> Result<()> {
        self.turn_start.acquire().await?.forget();
        Ok(())
    }

    pub fn finish_turn(&self) {
        self.turn_finished.add_permits(1);
    }

    /// Blocks until `actors` tasks have called [`TurnGates::finish_turn`].
    pub async fn collect_finished(&self, actors: usize) -> Result<()> {
        if actors == 0 {
            return Ok(());
        }
        self.turn_finished.acquire_many(actors as u32).await?.forget();
        Ok(())
    }

    pub fn release_render(&self, actors: usize) {
        self.render_complete.add_permits(actors);
    }

    pub async fn await_render(&self) -> Result<()> {
        self.render_complete.acquire().await?.forget();
        Ok(())
    }

    /// Wakes any task still parked on a gate with `GameError::GateClosed`.
    pub fn close(&self) {
        self.turn_start.close();
        self.turn_finished.close();
        self.render_complete.close();
    }

    /// Closes the gates when the returned guard drops, including while a
    /// panicking coordinator unwinds.
    pub fn close_on_drop(&self) -> GateCloser<'_> {
        GateCloser { gates: self }
    }
}

#[must_use]
pub struct GateCloser<'a> {
    gates: &'a TurnGates,
}

impl Drop for GateCloser<'_> {
    fn drop(&mut self) {
        self.gates.close();
    }
}
