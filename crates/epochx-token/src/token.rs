use epochx_core::constants::DEFAULT_DECIMALS;
use epochx_core::error::EpochxError;
use epochx_core::event::LedgerEvent;
use epochx_core::types::{AccountId, Balance, Epoch, EpochType, Position};
use epochx_state::{LedgerEngine, NearestExpiry};
use epochx_window::SlidingWindow;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::source::PositionSource;

/// Descriptive token fields. They have no effect on ledger behaviour.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Default for TokenMetadata {
    fn default() -> Self {
        Self {
            name: "Expiring Token".into(),
            symbol: "EXP".into(),
            decimals: DEFAULT_DECIMALS,
        }
    }
}

/// An expirable fungible token.
///
/// Every call samples the position source once and hands that pointer to
/// the engine, so a single operation always sees one consistent window.
/// The caller identity is explicit; access control for `mint` and `burn`
/// belongs to whoever holds the token.
pub struct ExpiringToken<S: PositionSource> {
    engine: LedgerEngine,
    source: S,
    metadata: TokenMetadata,
}

impl<S: PositionSource> ExpiringToken<S> {
    /// In-memory token over a fresh ledger.
    pub fn new(metadata: TokenMetadata, window: SlidingWindow, source: S) -> Self {
        Self::with_engine(metadata, LedgerEngine::new(window), source)
    }

    /// Wrap an existing engine, e.g. one reopened from disk.
    pub fn with_engine(metadata: TokenMetadata, engine: LedgerEngine, source: S) -> Self {
        debug!(
            symbol = %metadata.symbol,
            epoch_type = %source.epoch_type(),
            window = ?engine.window(),
            "expiring token ready"
        );
        Self { engine, source, metadata }
    }

    pub fn engine(&self) -> &LedgerEngine {
        &self.engine
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn pointer(&self) -> Position {
        self.source.current()
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn symbol(&self) -> &str {
        &self.metadata.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.metadata.decimals
    }

    // ── Transfers ────────────────────────────────────────────────────────────

    pub fn transfer(&self, caller: &AccountId, to: &AccountId, amount: Balance) -> Result<(), EpochxError> {
        self.engine.transfer(self.pointer(), caller, to, amount)?;
        Ok(())
    }

    /// Move value out of `from` using `spender`'s allowance.
    pub fn transfer_from(
        &self,
        spender: &AccountId,
        from: &AccountId,
        to: &AccountId,
        amount: Balance,
    ) -> Result<(), EpochxError> {
        self.engine.transfer_from(self.pointer(), spender, from, to, amount)?;
        Ok(())
    }

    /// Transfer drawing only from buckets minted in `epoch`.
    pub fn transfer_at_epoch(
        &self,
        caller: &AccountId,
        epoch: Epoch,
        to: &AccountId,
        amount: Balance,
    ) -> Result<(), EpochxError> {
        self.engine.transfer_at_epoch(self.pointer(), epoch, caller, to, amount)?;
        Ok(())
    }

    pub fn transfer_from_at_epoch(
        &self,
        spender: &AccountId,
        epoch: Epoch,
        from: &AccountId,
        to: &AccountId,
        amount: Balance,
    ) -> Result<(), EpochxError> {
        self.engine
            .transfer_from_at_epoch(self.pointer(), epoch, spender, from, to, amount)?;
        Ok(())
    }

    // ── Allowances ───────────────────────────────────────────────────────────

    /// Set `spender`'s allowance. `INFINITE_ALLOWANCE` is never decremented.
    pub fn approve(&self, owner: &AccountId, spender: &AccountId, amount: Balance) -> Result<(), EpochxError> {
        self.engine.approve(owner, spender, amount)?;
        Ok(())
    }

    pub fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Balance {
        self.engine.allowance(owner, spender)
    }

    // ── Supply ───────────────────────────────────────────────────────────────

    pub fn mint(&self, to: &AccountId, amount: Balance) -> Result<(), EpochxError> {
        self.engine.mint(self.pointer(), to, amount)?;
        Ok(())
    }

    pub fn burn(&self, from: &AccountId, amount: Balance) -> Result<(), EpochxError> {
        self.engine.burn(self.pointer(), from, amount)?;
        Ok(())
    }

    // ── Views ────────────────────────────────────────────────────────────────

    pub fn balance_of(&self, account: &AccountId) -> Balance {
        self.engine.balance_of(self.pointer(), account)
    }

    pub fn balance_of_at_epoch(&self, epoch: Epoch, account: &AccountId) -> Balance {
        self.engine.balance_of_at_epoch(self.pointer(), epoch, account)
    }

    pub fn nearest_expiry_of(&self, account: &AccountId) -> Option<NearestExpiry> {
        self.engine.nearest_expiry(self.pointer(), account)
    }

    pub fn current_epoch(&self) -> Epoch {
        self.engine.window().index_for(self.pointer())
    }

    /// Positions per epoch.
    pub fn epoch_length(&self) -> u64 {
        self.engine.window().bucket_duration
    }

    /// Epochs a freshly minted unit stays in the window.
    pub fn validity_duration(&self) -> u64 {
        self.engine.window().window_size
    }

    pub fn is_epoch_expired(&self, epoch: Epoch) -> bool {
        self.engine.window().is_epoch_expired(epoch, self.pointer())
    }

    pub fn epoch_type(&self) -> EpochType {
        self.source.epoch_type()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.engine.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BlockHeight, SystemClock};
    use epochx_core::constants::INFINITE_ALLOWANCE;

    fn alice() -> AccountId {
        AccountId::from_label("alice")
    }

    fn bob() -> AccountId {
        AccountId::from_label("bob")
    }

    fn carol() -> AccountId {
        AccountId::from_label("carol")
    }

    fn token() -> ExpiringToken<BlockHeight> {
        let window = SlidingWindow::setup(0, 10, 2, true).unwrap();
        ExpiringToken::new(TokenMetadata::default(), window, BlockHeight::new(0))
    }

    #[test]
    fn metadata_and_window_views() {
        let t = token();
        assert_eq!(t.name(), "Expiring Token");
        assert_eq!(t.symbol(), "EXP");
        assert_eq!(t.decimals(), 18);
        assert_eq!(t.epoch_length(), 10);
        assert_eq!(t.validity_duration(), 2);
        assert_eq!(t.epoch_type(), EpochType::BlocksBased);
    }

    #[test]
    fn balances_follow_the_block_height() {
        let t = token();
        t.source().set(5);
        t.mint(&alice(), 100).unwrap();
        t.source().set(25);
        t.mint(&alice(), 50).unwrap();
        assert_eq!(t.current_epoch(), 2);
        assert_eq!(t.balance_of(&alice()), 150);

        t.source().set(35);
        assert_eq!(t.current_epoch(), 3);
        assert!(t.is_epoch_expired(0));
        assert!(!t.is_epoch_expired(1));
        assert_eq!(t.balance_of(&alice()), 50);
        assert_eq!(t.balance_of_at_epoch(2, &alice()), 50);

        t.transfer(&alice(), &bob(), 50).unwrap();
        assert_eq!(t.balance_of(&bob()), 50);
        assert_eq!(t.balance_of(&alice()), 0);
    }

    #[test]
    fn transfer_at_expired_epoch_is_rejected() {
        let t = token();
        t.source().set(5);
        t.mint(&alice(), 10).unwrap();
        t.source().set(35);
        assert_eq!(
            t.transfer_at_epoch(&alice(), 0, &bob(), 1).unwrap_err(),
            EpochxError::TransferredExpiredToken { epoch: 0 }
        );
    }

    #[test]
    fn transfer_from_consumes_finite_allowance() {
        let t = token();
        t.mint(&alice(), 100).unwrap();
        t.approve(&alice(), &bob(), 30).unwrap();

        t.transfer_from(&bob(), &alice(), &carol(), 20).unwrap();
        assert_eq!(t.allowance(&alice(), &bob()), 10);
        assert_eq!(t.balance_of(&carol()), 20);

        let err = t.transfer_from(&bob(), &alice(), &carol(), 11).unwrap_err();
        assert_eq!(
            err,
            EpochxError::InsufficientAllowance { spender: bob(), allowance: 10, needed: 11 }
        );
    }

    #[test]
    fn infinite_allowance_is_not_decremented() {
        let t = token();
        t.source().set(12);
        t.mint(&alice(), 100).unwrap();
        t.approve(&alice(), &bob(), INFINITE_ALLOWANCE).unwrap();
        t.transfer_from_at_epoch(&bob(), 1, &alice(), &carol(), 60).unwrap();
        assert_eq!(t.allowance(&alice(), &bob()), INFINITE_ALLOWANCE);
        assert_eq!(t.balance_of_at_epoch(1, &carol()), 60);
    }

    #[test]
    fn burn_and_nearest_expiry() {
        let t = token();
        t.source().set(3);
        t.mint(&alice(), 40).unwrap();
        t.source().set(14);
        t.mint(&alice(), 60).unwrap();
        t.burn(&alice(), 50).unwrap();

        let next = t.nearest_expiry_of(&alice()).unwrap();
        assert_eq!(next.position, 14);
        assert_eq!(next.amount, 50);
        assert_eq!(next.expires_at, 35);
        assert_eq!(t.nearest_expiry_of(&bob()), None);
    }

    #[tokio::test]
    async fn subscribers_see_token_events() {
        let t = token();
        let mut rx = t.subscribe();
        t.mint(&alice(), 7).unwrap();
        t.approve(&alice(), &bob(), 1).unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            LedgerEvent::Minted { to: alice(), amount: 7, position: 0 }
        );
        assert!(matches!(rx.recv().await.unwrap(), LedgerEvent::Approved { amount: 1, .. }));
    }

    #[test]
    fn system_clock_token_reports_time_based() {
        let window = SlidingWindow::setup(0, 86_400, 30, true).unwrap();
        let t = ExpiringToken::new(TokenMetadata::default(), window, SystemClock);
        assert_eq!(t.epoch_type(), EpochType::TimeBased);
        assert!(t.current_epoch() > 18_000);
        t.mint(&alice(), 5).unwrap();
        assert_eq!(t.balance_of(&alice()), 5);
    }

    #[test]
    fn metadata_serializes_as_json() {
        let json = serde_json::to_string(&TokenMetadata::default()).unwrap();
        assert_eq!(json, r#"{"name":"Expiring Token","symbol":"EXP","decimals":18}"#);
    }
}
