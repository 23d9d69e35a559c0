// src/execution/position.rs - Position state derived from confirmations
use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use log::{info, warn};

use crate::errors::EngineError;
use crate::execution::protocol::{PositionEvent, PositionUpdate};
use crate::types::{Confirmation, FireCommand, LegStatus, PositionState};

const SINGLE_LEG_ID: &str = "main";

#[derive(Debug, Clone, PartialEq)]
enum LegOutcome {
    Filled {
        ticket: Option<i64>,
        fill_price: Option<f64>,
    },
    Rejected {
        detail: String,
    },
}

/// Tracks one fire_id's legs. The state is derived from the *set* of
/// recorded outcomes, so leg confirmations can arrive in any order and
/// still reduce to the same result.
#[derive(Debug)]
pub struct PositionTracker {
    fire_id: String,
    expected_legs: usize,
    staged: bool,
    outcomes: HashMap<String, LegOutcome>,
    closed_legs: HashSet<String>,
    trail_active: bool,
    confirmations: Vec<Confirmation>,
}

impl PositionTracker {
    fn new(cmd: &FireCommand) -> Self {
        Self {
            fire_id: cmd.fire_id.clone(),
            expected_legs: cmd.expected_legs(),
            staged: cmd.staged_config.is_some(),
            outcomes: HashMap::new(),
            closed_legs: HashSet::new(),
            trail_active: false,
            confirmations: Vec::new(),
        }
    }

    fn leg_key(leg_id: &Option<String>) -> String {
        leg_id.clone().unwrap_or_else(|| SINGLE_LEG_ID.to_string())
    }

    /// Record one leg confirmation. Duplicates for an already-resolved
    /// leg are ignored (the first outcome stands).
    fn record_confirmation(&mut self, conf: &Confirmation) -> bool {
        let key = Self::leg_key(&conf.leg_id);
        if self.outcomes.contains_key(&key) {
            warn!(
                "📌 [POSITION] Duplicate confirmation for {} leg {} ignored",
                self.fire_id, key
            );
            return false;
        }
        let outcome = match conf.status {
            LegStatus::Ok => LegOutcome::Filled {
                ticket: conf.ticket,
                fill_price: conf.fill_price,
            },
            LegStatus::Error => LegOutcome::Rejected {
                detail: conf
                    .error_detail
                    .clone()
                    .unwrap_or_else(|| "unspecified".to_string()),
            },
        };
        self.outcomes.insert(key, outcome);
        self.confirmations.push(conf.clone());
        true
    }

    fn record_update(&mut self, update: &PositionUpdate) {
        match update.event {
            PositionEvent::TrailActivated => {
                self.trail_active = true;
            }
            PositionEvent::LegClosed => {
                if matches!(self.outcomes.get(&update.leg_id), Some(LegOutcome::Filled { .. })) {
                    self.closed_legs.insert(update.leg_id.clone());
                } else {
                    warn!(
                        "📌 [POSITION] Close report for unknown/unfilled leg {} of {}",
                        update.leg_id, self.fire_id
                    );
                }
            }
        }
    }

    pub fn state(&self) -> PositionState {
        let filled = self
            .outcomes
            .values()
            .filter(|o| matches!(o, LegOutcome::Filled { .. }))
            .count();
        let rejected = self.outcomes.len() - filled;
        let resolved = self.outcomes.len();

        if resolved == 0 {
            return PositionState::Pending;
        }
        if resolved >= self.expected_legs && filled == 0 {
            return PositionState::Failed;
        }
        if resolved >= self.expected_legs && rejected > 0 {
            // Mixed outcome stays explicit, never collapsed into success
            // or failure.
            return if self.closed_legs.len() >= filled {
                PositionState::Closed
            } else {
                PositionState::PartiallyFilled
            };
        }
        if filled == 0 {
            return PositionState::Pending;
        }

        // At least one fill and no rejection recorded so far.
        let open_legs = filled - self.closed_legs.len().min(filled);
        if resolved >= self.expected_legs && open_legs == 0 {
            return PositionState::Closed;
        }
        if self.staged {
            match self.closed_legs.len() {
                0 => {
                    if self.trail_active {
                        PositionState::Trailing
                    } else {
                        PositionState::Open
                    }
                }
                1 => PositionState::Partial1,
                2 => {
                    if self.trail_active {
                        PositionState::Trailing
                    } else {
                        PositionState::Partial2
                    }
                }
                _ => PositionState::Closed,
            }
        } else {
            PositionState::Open
        }
    }

    pub fn confirmations(&self) -> &[Confirmation] {
        &self.confirmations
    }

    pub fn resolved_legs(&self) -> usize {
        self.outcomes.len()
    }
}

/// All positions the engine has fired, keyed by fire_id. Also the
/// duplicate-fire guard: a fire_id can only ever be registered once.
pub struct PositionLedger {
    positions: DashMap<String, PositionTracker>,
}

impl Default for PositionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionLedger {
    pub fn new() -> Self {
        Self {
            positions: DashMap::new(),
        }
    }

    /// Reserve a fire_id before the command goes out. A duplicate is an
    /// error carrying the id so the caller replays stored confirmations
    /// instead of re-sending a live order.
    pub fn register_fire(&self, cmd: &FireCommand) -> Result<(), EngineError> {
        if self.positions.contains_key(&cmd.fire_id) {
            return Err(EngineError::DuplicateFire(cmd.fire_id.clone()));
        }
        self.positions
            .insert(cmd.fire_id.clone(), PositionTracker::new(cmd));
        Ok(())
    }

    pub fn record_confirmation(&self, conf: &Confirmation) -> Option<PositionState> {
        let mut tracker = match self.positions.get_mut(&conf.fire_id) {
            Some(t) => t,
            None => {
                warn!(
                    "📌 [POSITION] Confirmation for unknown fire_id {} dropped",
                    conf.fire_id
                );
                return None;
            }
        };
        tracker.record_confirmation(conf);
        let state = tracker.state();
        info!(
            "📌 [POSITION] {} now {:?} ({} of {} legs resolved)",
            conf.fire_id,
            state,
            tracker.resolved_legs(),
            tracker.expected_legs
        );
        Some(state)
    }

    pub fn record_update(&self, update: &PositionUpdate) -> Option<PositionState> {
        let mut tracker = self.positions.get_mut(&update.fire_id)?;
        tracker.record_update(update);
        Some(tracker.state())
    }

    pub fn state(&self, fire_id: &str) -> Option<PositionState> {
        self.positions.get(fire_id).map(|t| t.state())
    }

    /// Stored confirmations for idempotent replay on a duplicate fire.
    pub fn stored_confirmations(&self, fire_id: &str) -> Vec<Confirmation> {
        self.positions
            .get(fire_id)
            .map(|t| t.confirmations().to_vec())
            .unwrap_or_default()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions
            .iter()
            .filter(|t| {
                !matches!(
                    t.state(),
                    PositionState::Closed | PositionState::Failed | PositionState::Pending
                )
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AccountSnapshot, Direction, StageLeg, StagedPlan, TrailLeg,
    };
    use chrono::{TimeZone, Utc};

    fn staged_cmd() -> FireCommand {
        FireCommand {
            fire_id: "fire-1".to_string(),
            target_identity: "node-a".to_string(),
            instrument: "EURUSD".to_string(),
            direction: Direction::Buy,
            entry: 1.1000,
            stop_loss: 1.0985,
            take_profit: 1.1030,
            volume: 0.30,
            staged_config: Some(StagedPlan {
                stage1: StageLeg { trigger_pips: 10.0, close_percent: 25.0 },
                stage2: StageLeg { trigger_pips: 20.0, close_percent: 25.0 },
                trail: TrailLeg { distance_pips: 8.0 },
            }),
        }
    }

    fn confirmation(leg: &str, status: LegStatus) -> Confirmation {
        Confirmation {
            fire_id: "fire-1".to_string(),
            leg_id: Some(leg.to_string()),
            status,
            ticket: if status == LegStatus::Ok { Some(42) } else { None },
            fill_price: if status == LegStatus::Ok { Some(1.1001) } else { None },
            error_detail: if status == LegStatus::Error {
                Some("no liquidity".to_string())
            } else {
                None
            },
            account_snapshot: AccountSnapshot::default(),
        }
    }

    fn close_update(leg: &str) -> PositionUpdate {
        PositionUpdate {
            fire_id: "fire-1".to_string(),
            leg_id: leg.to_string(),
            event: PositionEvent::LegClosed,
            price: 1.1010,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn duplicate_fire_id_is_refused() {
        let ledger = PositionLedger::new();
        let cmd = staged_cmd();
        ledger.register_fire(&cmd).unwrap();
        match ledger.register_fire(&cmd) {
            Err(EngineError::DuplicateFire(id)) => assert_eq!(id, "fire-1"),
            other => panic!("expected DuplicateFire, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn leg_confirmations_reduce_commutatively() {
        let legs = ["s1", "s2", "trail"];
        let orders: Vec<Vec<usize>> = vec![
            vec![0, 1, 2],
            vec![0, 2, 1],
            vec![1, 0, 2],
            vec![1, 2, 0],
            vec![2, 0, 1],
            vec![2, 1, 0],
        ];
        let mut states = Vec::new();
        for order in orders {
            let ledger = PositionLedger::new();
            ledger.register_fire(&staged_cmd()).unwrap();
            for idx in order {
                let status = if legs[idx] == "s2" { LegStatus::Error } else { LegStatus::Ok };
                ledger.record_confirmation(&confirmation(legs[idx], status));
            }
            states.push(ledger.state("fire-1").unwrap());
        }
        assert!(states.iter().all(|s| *s == states[0]));
        assert_eq!(states[0], PositionState::PartiallyFilled);
    }

    #[test]
    fn two_fills_one_rejection_is_partial_not_failure() {
        let ledger = PositionLedger::new();
        ledger.register_fire(&staged_cmd()).unwrap();
        ledger.record_confirmation(&confirmation("s1", LegStatus::Ok));
        ledger.record_confirmation(&confirmation("s2", LegStatus::Error));
        ledger.record_confirmation(&confirmation("trail", LegStatus::Ok));
        assert_eq!(ledger.state("fire-1"), Some(PositionState::PartiallyFilled));
    }

    #[test]
    fn all_rejected_is_failed() {
        let ledger = PositionLedger::new();
        ledger.register_fire(&staged_cmd()).unwrap();
        for leg in ["s1", "s2", "trail"] {
            ledger.record_confirmation(&confirmation(leg, LegStatus::Error));
        }
        assert_eq!(ledger.state("fire-1"), Some(PositionState::Failed));
    }

    #[test]
    fn staged_lifecycle_progresses_through_partials() {
        let ledger = PositionLedger::new();
        ledger.register_fire(&staged_cmd()).unwrap();
        for leg in ["s1", "s2", "trail"] {
            ledger.record_confirmation(&confirmation(leg, LegStatus::Ok));
        }
        assert_eq!(ledger.state("fire-1"), Some(PositionState::Open));

        assert_eq!(
            ledger.record_update(&close_update("s1")),
            Some(PositionState::Partial1)
        );
        assert_eq!(
            ledger.record_update(&close_update("s2")),
            Some(PositionState::Partial2)
        );
        let trail_on = PositionUpdate {
            fire_id: "fire-1".to_string(),
            leg_id: "trail".to_string(),
            event: PositionEvent::TrailActivated,
            price: 1.1020,
            timestamp: Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
        };
        assert_eq!(ledger.record_update(&trail_on), Some(PositionState::Trailing));
        assert_eq!(
            ledger.record_update(&close_update("trail")),
            Some(PositionState::Closed)
        );
    }

    #[test]
    fn open_position_count_tracks_only_live_positions() {
        let ledger = PositionLedger::new();
        ledger.register_fire(&staged_cmd()).unwrap(); // stays pending

        let mut live = staged_cmd();
        live.fire_id = "fire-2".to_string();
        ledger.register_fire(&live).unwrap();
        let mut fill = confirmation("s1", LegStatus::Ok);
        fill.fire_id = "fire-2".to_string();
        ledger.record_confirmation(&fill);

        let mut failed = staged_cmd();
        failed.fire_id = "fire-3".to_string();
        ledger.register_fire(&failed).unwrap();
        for leg in ["s1", "s2", "trail"] {
            let mut c = confirmation(leg, LegStatus::Error);
            c.fire_id = "fire-3".to_string();
            ledger.record_confirmation(&c);
        }

        assert_eq!(ledger.open_position_count(), 1);
    }

    #[test]
    fn duplicate_leg_confirmation_does_not_change_state() {
        let ledger = PositionLedger::new();
        ledger.register_fire(&staged_cmd()).unwrap();
        ledger.record_confirmation(&confirmation("s1", LegStatus::Ok));
        let before = ledger.state("fire-1");
        ledger.record_confirmation(&confirmation("s1", LegStatus::Error));
        assert_eq!(ledger.state("fire-1"), before);
        assert_eq!(ledger.stored_confirmations("fire-1").len(), 1);
    }
}
