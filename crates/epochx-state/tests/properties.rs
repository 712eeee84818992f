//! Behavioural properties of the expiring ledger.
//!
//! Run with:
//!   cargo test -p epochx-state --test properties

use std::collections::HashMap;

use epochx_core::error::EpochxError;
use epochx_core::types::{AccountId, Balance, Bucket, Epoch, Position};
use epochx_state::{BalanceQuery, Ledger, LedgerEngine, SpendScope};
use epochx_window::SlidingWindow;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn window(d: u64, w: u64) -> SlidingWindow {
    SlidingWindow::setup(0, d, w, true).unwrap()
}

fn alice() -> AccountId {
    AccountId::from_label("alice")
}

fn bob() -> AccountId {
    AccountId::from_label("bob")
}

// ── Reference model ───────────────────────────────────────────────────────────

/// Naive ledger: one flat lot list per account, filtered by `is_live` on
/// every read.
struct Model {
    window: SlidingWindow,
    lots: HashMap<AccountId, Vec<(Position, Balance)>>,
    minted: Balance,
    burned: Balance,
}

impl Model {
    fn new(window: SlidingWindow) -> Self {
        Self { window, lots: HashMap::new(), minted: 0, burned: 0 }
    }

    fn add(&mut self, who: AccountId, position: Position, amount: Balance) {
        if amount == 0 {
            return;
        }
        let lots = self.lots.entry(who).or_default();
        match lots.iter_mut().find(|(p, _)| *p == position) {
            Some((_, a)) => *a += amount,
            None => {
                lots.push((position, amount));
                lots.sort_by_key(|(p, _)| *p);
            }
        }
    }

    fn live(&self, t: Position, who: &AccountId, epoch: Option<Epoch>) -> Balance {
        self.lots
            .get(who)
            .map(|lots| {
                lots.iter()
                    .filter(|(p, _)| self.window.is_live(*p, t))
                    .filter(|(p, _)| epoch.map_or(true, |e| self.window.index_for(*p) == e))
                    .map(|(_, a)| *a)
                    .sum()
            })
            .unwrap_or(0)
    }

    fn expired(&self, t: Position) -> Balance {
        self.lots
            .values()
            .flatten()
            .filter(|(p, _)| !self.window.is_live(*p, t))
            .map(|(_, a)| *a)
            .sum()
    }

    /// Returns the available amount on failure.
    fn spend(
        &mut self,
        t: Position,
        from: AccountId,
        to: Option<AccountId>,
        amount: Balance,
        epoch: Option<Epoch>,
    ) -> Result<(), Balance> {
        let available = self.live(t, &from, epoch);
        if available < amount {
            return Err(available);
        }
        let window = self.window;
        let mut moved = Vec::new();
        let mut remaining = amount;
        let lots = self.lots.entry(from).or_default();
        for (p, a) in lots.iter_mut() {
            if remaining == 0 {
                break;
            }
            if !window.is_live(*p, t) || epoch.is_some_and(|e| window.index_for(*p) != e) {
                continue;
            }
            let take = (*a).min(remaining);
            *a -= take;
            remaining -= take;
            moved.push((*p, take));
        }
        lots.retain(|(_, a)| *a > 0);
        for (p, a) in moved {
            match to {
                Some(to) => self.add(to, p, a),
                None => self.burned += a,
            }
        }
        Ok(())
    }
}

// ── Property 6 / 7: concrete scenario ─────────────────────────────────────────

#[test]
fn scenario_alice_bob_window_two() {
    let engine = LedgerEngine::new(window(10, 2));
    engine.mint(5, &alice(), 100).unwrap();
    engine.mint(25, &alice(), 50).unwrap();

    assert_eq!(engine.window().index_range(25), (0, 2));
    assert_eq!(engine.balance_of(25, &alice()), 150);

    assert_eq!(engine.window().index_range(35), (1, 3));
    assert_eq!(engine.balance_of(35, &alice()), 50);

    engine.transfer(35, &alice(), &bob(), 50).unwrap();
    assert_eq!(engine.balance_of(35, &alice()), 0);
    assert_eq!(engine.balance_of(35, &bob()), 50);
    assert_eq!(engine.buckets(35, 2, &bob()), vec![Bucket { position: 25, amount: 50 }]);
}

#[test]
fn scenario_overdraw_by_one_is_rejected_atomically() {
    let engine = LedgerEngine::new(window(10, 2));
    engine.mint(5, &alice(), 100).unwrap();
    engine.mint(25, &alice(), 50).unwrap();

    let before = engine.snapshot();
    assert_eq!(
        engine.transfer(35, &alice(), &bob(), 51).unwrap_err(),
        EpochxError::InsufficientBalance { account: alice(), available: 50, requested: 51 }
    );
    assert_eq!(engine.snapshot(), before);
}

// ── Property 2: FIFO ─────────────────────────────────────────────────────────

#[test]
fn fifo_consumes_oldest_bucket_first() {
    let mut ledger = Ledger::new(window(100, 3));
    for p in [10, 20, 30] {
        ledger.mint(p, &alice(), 40).unwrap();
    }
    ledger.transfer(31, &alice(), &bob(), 25, SpendScope::Window).unwrap();

    let remaining = ledger.epoch_balance(0, &alice()).unwrap().buckets().to_vec();
    assert_eq!(
        remaining,
        vec![
            Bucket { position: 10, amount: 15 },
            Bucket { position: 20, amount: 40 },
            Bucket { position: 30, amount: 40 },
        ]
    );
    let received = ledger.epoch_balance(0, &bob()).unwrap().buckets().to_vec();
    assert_eq!(received, vec![Bucket { position: 10, amount: 25 }]);
}

// ── Property 3: expiry monotonicity ──────────────────────────────────────────

/// Once value stops being spendable it never comes back.
///
/// Liveness here is stricter than an epoch distance of at most `W`: value
/// also has to be no older than `W * D` positions. The oldest epoch of
/// `index_range` is refreshed by age, so with W=2/D=10 a mint at 5 is gone
/// at t=26 although epoch 0 is still in range. The window scenario (150 at
/// t=25, 50 at t=35) depends on the same rule. Checking the epoch distance
/// alone would fail at, e.g., p=3 t=24.
#[test]
fn expiry_is_permanent_once_reached() {
    let (d, w) = (10, 2);
    let win = window(d, w);
    for p in [0, 3, 9, 10, 17] {
        let mut ledger = Ledger::new(win);
        ledger.mint(p, &alice(), 1).unwrap();
        let mut expired = false;
        for t in p..p + 80 {
            let spendable = BalanceQuery::new(&ledger).balance_of(t, &alice()) == 1;
            let within_epochs = win.index_for(t) - win.index_for(p) <= w;
            let within_age = t - p <= w * d;
            assert_eq!(spendable, within_epochs && within_age, "p={p} t={t}");
            if expired {
                assert!(!spendable, "bucket at {p} revived at {t}");
            }
            expired |= !spendable;
        }
        assert!(expired);
    }
}

// ── Property 4: idempotent queries ───────────────────────────────────────────

#[test]
fn queries_are_idempotent_and_side_effect_free() {
    let mut ledger = Ledger::new(window(10, 2));
    ledger.mint(1, &alice(), 5).unwrap();
    ledger.mint(12, &alice(), 7).unwrap();
    let before = ledger.clone();
    let q = BalanceQuery::new(&ledger);
    for t in [12, 21, 22, 30, 45] {
        assert_eq!(q.balance_of(t, &alice()), q.balance_of(t, &alice()));
        assert_eq!(q.nearest_expiry(t, &alice()), q.nearest_expiry(t, &alice()));
    }
    assert_eq!(ledger, before);
}

// ── Property 5: atomicity across epochs ──────────────────────────────────────

#[test]
fn multi_epoch_overdraw_touches_nothing() {
    let mut ledger = Ledger::new(window(10, 3));
    ledger.mint(2, &alice(), 10).unwrap();
    ledger.mint(12, &alice(), 10).unwrap();
    ledger.mint(22, &alice(), 10).unwrap();
    ledger.mint(32, &alice(), 10).unwrap();

    // At 33 the bucket at 2 is past the cutoff (3) and is due for eviction;
    // the walk would drain three epochs before running short.
    let before = ledger.clone();
    let err = ledger
        .transfer(33, &alice(), &bob(), 31, SpendScope::Window)
        .unwrap_err();
    assert_eq!(
        err,
        EpochxError::InsufficientBalance { account: alice(), available: 30, requested: 31 }
    );
    assert_eq!(ledger, before);
    assert_eq!(ledger.epoch_balance(0, &alice()).unwrap().total(), 10);
}

// ── Property 1: conservation against a reference model ───────────────────────

#[test]
fn random_sequences_match_model_and_conserve_value() {
    let accounts: Vec<AccountId> = ["alice", "bob", "carol", "dave"]
        .iter()
        .map(|l| AccountId::from_label(l))
        .collect();

    for seed in 0..8u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let win = window(rng.gen_range(1..20), rng.gen_range(1..5));
        let mut ledger = Ledger::new(win);
        let mut model = Model::new(win);
        let mut t: Position = 0;

        for step in 0..400 {
            t += rng.gen_range(0..6);
            let from = accounts[rng.gen_range(0..accounts.len())];
            let to = accounts[rng.gen_range(0..accounts.len())];

            match rng.gen_range(0..10) {
                0..=2 => {
                    let amount = rng.gen_range(1..100);
                    ledger.mint(t, &to, amount).unwrap();
                    model.add(to, t, amount);
                    model.minted += amount;
                }
                3..=6 => {
                    let amount = rng.gen_range(0..model.live(t, &from, None) + 20);
                    let before = ledger.clone();
                    let result = ledger.transfer(t, &from, &to, amount, SpendScope::Window);
                    match model.spend(t, from, Some(to), amount, None) {
                        Ok(()) => assert!(result.is_ok(), "seed {seed} step {step}"),
                        Err(available) => {
                            assert_eq!(
                                result.unwrap_err(),
                                EpochxError::InsufficientBalance {
                                    account: from,
                                    available,
                                    requested: amount
                                },
                                "seed {seed} step {step}"
                            );
                            assert_eq!(ledger, before);
                        }
                    }
                }
                7 => {
                    let amount = rng.gen_range(0..model.live(t, &from, None) + 10);
                    let result = ledger.burn(t, &from, amount, SpendScope::Window);
                    assert_eq!(result.is_ok(), model.spend(t, from, None, amount, None).is_ok());
                }
                _ => {
                    let (first, last) = win.index_range(t);
                    let epoch = rng.gen_range(first.saturating_sub(1)..=last + 1);
                    let amount = rng.gen_range(0..model.live(t, &from, Some(epoch)) + 5);
                    let result = ledger.transfer(t, &from, &to, amount, SpendScope::Epoch(epoch));
                    if epoch < first {
                        assert_eq!(
                            result.unwrap_err(),
                            EpochxError::TransferredExpiredToken { epoch }
                        );
                    } else {
                        let expected = model.spend(t, from, Some(to), amount, Some(epoch));
                        assert_eq!(result.is_ok(), expected.is_ok(), "seed {seed} step {step}");
                    }
                }
            }

            let q = BalanceQuery::new(&ledger);
            for who in &accounts {
                assert_eq!(q.balance_of(t, who), model.live(t, who, None), "seed {seed} step {step}");
            }
        }

        let q = BalanceQuery::new(&ledger);
        let held: Balance = accounts.iter().map(|who| q.balance_of(t, who)).sum();
        assert_eq!(q.total_supply_minted(), model.minted);
        assert_eq!(q.total_burned(), model.burned);
        assert_eq!(held, model.minted - model.burned - model.expired(t));
    }
}

// ── Per-epoch totals stay equal to their buckets ─────────────────────────────

#[test]
fn epoch_totals_equal_bucket_sums_after_churn() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut ledger = Ledger::new(window(5, 2));
    let mut t = 0;
    for _ in 0..300 {
        t += rng.gen_range(0..3);
        if rng.gen_bool(0.4) {
            ledger.mint(t, &alice(), rng.gen_range(1..50)).unwrap();
        } else {
            let _ = ledger.transfer(t, &alice(), &bob(), rng.gen_range(0..60), SpendScope::Window);
            let _ = ledger.transfer(t, &bob(), &alice(), rng.gen_range(0..30), SpendScope::Window);
        }
    }
    for (_, eb) in ledger.epoch_entries() {
        let sum: Balance = eb.buckets().iter().map(|b| b.amount).sum();
        assert_eq!(eb.total(), sum);
    }
}
