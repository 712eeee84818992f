use std::path::Path;

use anyhow::Context;
use epochx_core::constants::{DEFAULT_BUCKET_DURATION, DEFAULT_DECIMALS, DEFAULT_WINDOW_SIZE};
use epochx_core::types::{EpochType, Position};
use epochx_state::StateDb;
use epochx_token::TokenMetadata;
use epochx_window::SlidingWindow;
use serde::{Deserialize, Serialize};

const META_PARAMS: &str = "params";

/// Ledger configuration, read from a JSON file at `init` and kept in the
/// database alongside the ledger.
///
/// ```json
/// { "origin": 0, "bucket_duration": 86400, "window_size": 30, "strict": true,
///   "epoch_type": "TimeBased", "name": "Expiring Token", "symbol": "EXP", "decimals": 18 }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerParams {
    pub origin: Position,
    pub bucket_duration: u64,
    pub window_size: u64,
    pub strict: bool,
    pub epoch_type: EpochType,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Default for LedgerParams {
    fn default() -> Self {
        let meta = TokenMetadata::default();
        Self {
            origin: 0,
            bucket_duration: DEFAULT_BUCKET_DURATION,
            window_size: DEFAULT_WINDOW_SIZE,
            strict: true,
            epoch_type: EpochType::TimeBased,
            name: meta.name,
            symbol: meta.symbol,
            decimals: DEFAULT_DECIMALS,
        }
    }
}

impl LedgerParams {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading params file {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("parsing params file {}", path.display()))
    }

    pub fn window(&self) -> anyhow::Result<SlidingWindow> {
        SlidingWindow::setup(self.origin, self.bucket_duration, self.window_size, self.strict)
            .context("invalid window parameters")
    }

    pub fn metadata(&self) -> TokenMetadata {
        TokenMetadata {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            decimals: self.decimals,
        }
    }

    pub fn load(db: &StateDb) -> anyhow::Result<Option<Self>> {
        let Some(bytes) = db.get_meta(META_PARAMS)? else {
            return Ok(None);
        };
        let params = serde_json::from_slice(&bytes).context("parsing stored ledger params")?;
        Ok(Some(params))
    }

    pub fn store(&self, db: &StateDb) -> anyhow::Result<()> {
        db.put_meta(META_PARAMS, &serde_json::to_vec(self)?)?;
        Ok(())
    }
}
