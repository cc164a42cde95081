pub const MAX_MOVES: usize = 20;
pub const MAX_GHOSTS: usize = 25;
pub const MAX_LEVELS: usize = 20;
pub const MAX_GRID_CELLS: usize = 1 << 16;

pub const DEFAULT_TEMPO_MS: u64 = 200;
pub const RESULT_SCREEN_MS: u64 = 2_000;

/// Share of the turn duration used as the base backoff window when the
/// second cell lock of a move is contended.
pub const BACKOFF_FRACTION: f64 = 0.05;

pub const KEY_CHECKPOINT: char = 'G';
pub const KEY_QUIT: char = 'Q';
pub const KEY_RANDOM: char = 'R';
pub const KEY_WAIT: char = 'T';
pub const KEY_CHARGE: char = 'C';

pub const LEVEL_EXTENSION: &str = "lvl";

pub fn backoff_range_ms(tempo_ms: u64) -> u64 {
    ((tempo_ms as f64 * BACKOFF_FRACTION) as u64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_range_never_drops_below_one_ms() {
        assert_eq!(backoff_range_ms(0), 1);
        assert_eq!(backoff_range_ms(10), 1);
        assert_eq!(backoff_range_ms(200), 10);
        assert_eq!(backoff_range_ms(1_000), 50);
    }
}
