//! Property tests over random operation streams
//!
//! Drives the ledger's pure arithmetic (commit splits, the reservation state
//! machine, balance deltas) through an in-memory model and checks the
//! accounting invariants after every step:
//!
//! - available and reserved never go negative
//! - reserved always equals the sum of active reservations' estimates
//! - available always reconciles against the journal totals
//! - a terminal reservation's commit + release rows sum to its estimate

use proptest::prelude::*;
use tally_core::models::{split_commit, ReservationState};
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Op {
    Credit(i64),
    Reserve(i64),
    Commit { slot: usize, actual: i64 },
    Release { slot: usize },
    Expire { slot: usize },
    Deduct(i64),
}

#[derive(Debug)]
struct ModelReservation {
    id: Uuid,
    estimated: i64,
    state: ReservationState,
    committed_row: i64,
    released_row: i64,
}

#[derive(Debug, Default)]
struct Model {
    available: i64,
    reserved: i64,
    credited: i64,
    committed: i64,
    refunded: i64,
    reservations: Vec<ModelReservation>,
}

impl Model {
    fn active_held(&self) -> i64 {
        self.reservations
            .iter()
            .filter(|r| r.state == ReservationState::Active)
            .map(|r| r.estimated)
            .sum()
    }

    fn apply(&mut self, op: &Op) {
        match op {
            Op::Credit(tokens) => {
                self.available += tokens;
                self.credited += tokens;
            }
            Op::Reserve(estimated) => {
                // Mirrors the service's precondition: reject on shortfall
                if self.available >= *estimated {
                    self.available -= estimated;
                    self.reserved += estimated;
                    self.reservations.push(ModelReservation {
                        id: Uuid::new_v4(),
                        estimated: *estimated,
                        state: ReservationState::Active,
                        committed_row: 0,
                        released_row: 0,
                    });
                }
            }
            Op::Commit { slot, actual } => {
                let Some(r) = self.pick_mut(*slot) else { return };
                if r.state != ReservationState::Active {
                    return;
                }
                let Ok(split) = split_commit(r.id, r.estimated, *actual) else {
                    return;
                };
                r.state = ReservationState::Committed;
                r.committed_row = split.committed;
                r.released_row = split.released;
                let estimated = r.estimated;
                self.available += split.released;
                self.reserved -= estimated;
                self.committed += split.committed;
            }
            Op::Release { slot } | Op::Expire { slot } => {
                let target = match op {
                    Op::Release { .. } => ReservationState::Released,
                    _ => ReservationState::Expired,
                };
                let Some(r) = self.pick_mut(*slot) else { return };
                if !r.state.can_transition_to(target) {
                    return;
                }
                r.state = target;
                r.released_row = r.estimated;
                let estimated = r.estimated;
                self.available += estimated;
                self.reserved -= estimated;
            }
            Op::Deduct(tokens) => {
                // Caller-side policy here forbids negative balances
                if self.available >= *tokens {
                    self.available -= tokens;
                    self.refunded += tokens;
                }
            }
        }
    }

    fn pick_mut(&mut self, slot: usize) -> Option<&mut ModelReservation> {
        if self.reservations.is_empty() {
            return None;
        }
        let idx = slot % self.reservations.len();
        self.reservations.get_mut(idx)
    }

    fn assert_invariants(&self) {
        assert!(self.available >= 0, "available went negative: {self:?}");
        assert!(self.reserved >= 0, "reserved went negative: {self:?}");

        assert_eq!(
            self.reserved,
            self.active_held(),
            "reserved balance out of sync with active holds"
        );

        // Balance math: everything credited, minus consumption, minus
        // clawbacks, minus what is currently held.
        assert_eq!(
            self.available,
            self.credited - self.committed - self.refunded - self.active_held(),
            "available does not reconcile against the journal"
        );

        for r in &self.reservations {
            if r.state.is_terminal() {
                assert_eq!(
                    r.committed_row + r.released_row,
                    r.estimated,
                    "terminal reservation {} does not account for its estimate",
                    r.id
                );
            }
        }
    }
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..5_000).prop_map(Op::Credit),
        (1i64..3_000).prop_map(Op::Reserve),
        ((0usize..8), (1i64..3_500)).prop_map(|(slot, actual)| Op::Commit { slot, actual }),
        (0usize..8).prop_map(|slot| Op::Release { slot }),
        (0usize..8).prop_map(|slot| Op::Expire { slot }),
        (1i64..2_000).prop_map(Op::Deduct),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn invariants_hold_across_random_streams(ops in proptest::collection::vec(op_strategy(), 1..80)) {
        let mut model = Model::default();
        for op in &ops {
            model.apply(op);
            model.assert_invariants();
        }
    }

    #[test]
    fn terminal_reservations_never_retransition(
        estimated in 1i64..10_000,
        actual in 1i64..10_000,
    ) {
        let mut model = Model::default();
        model.apply(&Op::Credit(20_000));
        model.apply(&Op::Reserve(estimated));

        model.apply(&Op::Commit { slot: 0, actual });
        let after_first: Vec<_> = model
            .reservations
            .iter()
            .map(|r| (r.state, r.committed_row, r.released_row))
            .collect();
        let available_after_first = model.available;

        // Whatever happened, a second terminal op must be a no-op
        model.apply(&Op::Release { slot: 0 });
        model.apply(&Op::Commit { slot: 0, actual });
        model.apply(&Op::Expire { slot: 0 });

        let after_ops: Vec<_> = model
            .reservations
            .iter()
            .map(|r| (r.state, r.committed_row, r.released_row))
            .collect();

        if after_first[0].0.is_terminal() {
            prop_assert_eq!(after_first, after_ops);
            prop_assert_eq!(available_after_first, model.available);
        }
        model.assert_invariants();
    }
}

#[test]
fn seeded_happy_path_partial_commit() {
    // Balance 5000 -> reserve 1000 -> commit 600 releases 400
    let mut model = Model::default();
    model.apply(&Op::Credit(5_000));
    model.apply(&Op::Reserve(1_000));
    assert_eq!(model.available, 4_000);
    assert_eq!(model.reserved, 1_000);

    model.apply(&Op::Commit { slot: 0, actual: 600 });
    assert_eq!(model.available, 4_400);
    assert_eq!(model.reserved, 0);
    assert_eq!(model.reservations[0].state, ReservationState::Committed);
    assert_eq!(model.reservations[0].committed_row, 600);
    assert_eq!(model.reservations[0].released_row, 400);
    model.assert_invariants();
}

#[test]
fn seeded_over_commit_rejected_leaves_state() {
    let mut model = Model::default();
    model.apply(&Op::Credit(5_000));
    model.apply(&Op::Reserve(1_000));

    // 1500 > 1000: split_commit refuses, the model stays untouched
    model.apply(&Op::Commit {
        slot: 0,
        actual: 1_500,
    });
    assert_eq!(model.available, 4_000);
    assert_eq!(model.reserved, 1_000);
    assert_eq!(model.reservations[0].state, ReservationState::Active);
    model.assert_invariants();
}

#[test]
fn seeded_exact_commit_has_no_release() {
    let mut model = Model::default();
    model.apply(&Op::Credit(1_000));
    model.apply(&Op::Reserve(1_000));
    model.apply(&Op::Commit {
        slot: 0,
        actual: 1_000,
    });

    assert_eq!(model.available, 0);
    assert_eq!(model.reservations[0].released_row, 0);
    model.assert_invariants();
}
