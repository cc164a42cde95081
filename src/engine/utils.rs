use std::time::Duration;

use crate::rng::Rng;

/// Seed for one actor's generator. Slot 0 is the player, ghosts follow.
pub(super) fn actor_seed(seed: u32, level: usize, slot: usize) -> u32 {
    Rng::derive(Rng::derive(seed, level as u32), slot as u32 + 1)
}

/// Seed for the nth checkpoint branch so its random moves diverge from the
/// timeline it was forked from.
pub(super) fn branch_seed(seed: u32, branch: usize) -> u32 {
    Rng::derive(seed ^ 0xb7a4_c3e1, branch as u32)
}

pub(super) async fn pause(duration: Duration) {
    if duration.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn actor_seeds_differ_per_slot_and_level() {
        let seeds: HashSet<u32> = (1..4)
            .flat_map(|level| (0..8).map(move |slot| actor_seed(42, level, slot)))
            .collect();
        assert_eq!(seeds.len(), 24);
        assert_eq!(actor_seed(42, 1, 0), actor_seed(42, 1, 0));
    }

    #[test]
    fn branch_seed_differs_from_parent() {
        assert_ne!(branch_seed(7, 1), 7);
        assert_ne!(branch_seed(7, 1), branch_seed(7, 2));
    }
}
