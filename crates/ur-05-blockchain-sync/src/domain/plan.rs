//! # Tick Planning
//!
//! Pure cursor arithmetic: given the stored heads and the chain height,
//! which block ranges does this tick scan and where do the heads end up.
//!
//! ## Invariants
//!
//! - Both heads only move forward (a reorg rewinds the unconfirmed head
//!   before planning, never during).
//! - The confirmed head trails the unconfirmed head by `n_confirmations`.
//! - A block is dispatched to the unconfirmed handlers only while it is
//!   above the confirmed head; blocks that become confirmed in the same
//!   tick go straight to the confirmed handlers.

use crate::config::SyncConfig;
use shared_types::BlockNumber;
use ur_03_channel_store::SyncState;

/// Inclusive block range; empty when `from > to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: BlockNumber,
    pub to: BlockNumber,
}

impl BlockRange {
    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }
}

/// What one tick scans and commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickPlan {
    pub confirmed: BlockRange,
    pub unconfirmed: BlockRange,
    pub confirmed_head: BlockNumber,
    pub unconfirmed_head: BlockNumber,
}

/// Plan the next tick, or `None` when neither head would advance.
pub fn plan_tick(state: &SyncState, current_block: BlockNumber, config: &SyncConfig) -> Option<TickPlan> {
    let start = config.start_block;
    if current_block < start {
        return None;
    }
    let next_unconfirmed = state.unconfirmed_head_number.map_or(start, |n| n + 1).max(start);
    let next_confirmed = state.confirmed_head_number.map_or(start, |n| n + 1).max(start);

    let chunk = config.sync_chunk_size.max(1);
    let unconfirmed_head = next_unconfirmed
        .saturating_add(chunk - 1)
        .min(current_block)
        .max(state.unconfirmed_head_number.unwrap_or(0));
    let confirmed_head = unconfirmed_head
        .saturating_sub(config.n_confirmations)
        .max(state.confirmed_head_number.unwrap_or(0));

    let unconfirmed_done = state.unconfirmed_head_number.is_some_and(|n| n >= unconfirmed_head);
    let confirmed_done = state.confirmed_head_number.is_some_and(|n| n >= confirmed_head);
    if unconfirmed_done && confirmed_done {
        return None;
    }

    Some(TickPlan {
        confirmed: BlockRange {
            from: next_confirmed,
            to: confirmed_head,
        },
        unconfirmed: BlockRange {
            from: next_unconfirmed.max(confirmed_head + 1),
            to: unconfirmed_head,
        },
        confirmed_head,
        unconfirmed_head,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk: u64, confirmations: u64) -> SyncConfig {
        SyncConfig {
            sync_chunk_size: chunk,
            n_confirmations: confirmations,
            ..SyncConfig::for_testing()
        }
    }

    fn state(unconfirmed: u64, confirmed: u64) -> SyncState {
        SyncState {
            unconfirmed_head_number: Some(unconfirmed),
            confirmed_head_number: Some(confirmed),
            ..SyncState::default()
        }
    }

    #[test]
    fn test_first_tick_from_genesis() {
        let plan = plan_tick(&SyncState::default(), 10, &config(100, 2)).unwrap();
        assert_eq!(plan.unconfirmed_head, 10);
        assert_eq!(plan.confirmed_head, 8);
        assert_eq!(plan.confirmed, BlockRange { from: 0, to: 8 });
        assert_eq!(plan.unconfirmed, BlockRange { from: 9, to: 10 });
    }

    #[test]
    fn test_chunked_catch_up() {
        let plan = plan_tick(&state(10, 8), 100, &config(5, 2)).unwrap();
        assert_eq!(plan.unconfirmed_head, 15);
        assert_eq!(plan.confirmed_head, 13);
        assert_eq!(plan.confirmed, BlockRange { from: 9, to: 13 });
        assert_eq!(plan.unconfirmed, BlockRange { from: 14, to: 15 });
    }

    #[test]
    fn test_no_progress_skips() {
        assert_eq!(plan_tick(&state(10, 8), 10, &config(100, 2)), None);
    }

    #[test]
    fn test_single_new_block() {
        let plan = plan_tick(&state(10, 8), 11, &config(100, 2)).unwrap();
        assert_eq!(plan.unconfirmed, BlockRange { from: 11, to: 11 });
        assert_eq!(plan.confirmed, BlockRange { from: 9, to: 9 });
    }

    #[test]
    fn test_short_chain_confirms_nothing_new() {
        let plan = plan_tick(&SyncState::default(), 1, &config(100, 5)).unwrap();
        assert_eq!(plan.confirmed_head, 0);
        assert_eq!(plan.confirmed, BlockRange { from: 0, to: 0 });
        assert_eq!(plan.unconfirmed, BlockRange { from: 1, to: 1 });
    }

    #[test]
    fn test_rewound_unconfirmed_head_never_drags_confirmed_back() {
        // After a reorg reset: unconfirmed rewound onto confirmed, chain shorter
        let plan = plan_tick(&state(10, 10), 11, &config(100, 3)).unwrap();
        assert_eq!(plan.confirmed_head, 10);
        assert!(plan.confirmed.is_empty());
        assert_eq!(plan.unconfirmed, BlockRange { from: 11, to: 11 });
    }

    #[test]
    fn test_start_block() {
        let cfg = SyncConfig {
            start_block: 50,
            ..config(100, 1)
        };
        assert_eq!(plan_tick(&SyncState::default(), 40, &cfg), None);
        let plan = plan_tick(&SyncState::default(), 60, &cfg).unwrap();
        assert_eq!(plan.confirmed, BlockRange { from: 50, to: 59 });
        assert_eq!(plan.unconfirmed, BlockRange { from: 60, to: 60 });
    }
}
