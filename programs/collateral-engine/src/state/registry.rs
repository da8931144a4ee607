use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::pubkey::Pubkey;
use std::collections::BTreeMap;

use crate::{constants::MAX_COLLATERAL_ASSETS, error::EngineError};

/// Fixed set of accepted collateral assets, each mapped to its price feed.
///
/// Built once at construction and immutable afterward.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct AssetRegistry {
    /// Accepted assets in registration order.
    assets: Vec<Pubkey>,
    /// asset -> price feed
    feeds: BTreeMap<Pubkey, Pubkey>,
}

impl AssetRegistry {
    /// Builds the registry from parallel asset/feed vectors.
    ///
    /// Fails with `InvalidArgument` on mismatched lengths, duplicate
    /// assets, or more assets than the ledger account is sized for.
    pub fn new(assets: Vec<Pubkey>, feeds: Vec<Pubkey>) -> Result<Self, EngineError> {
        if assets.len() != feeds.len() || assets.len() > MAX_COLLATERAL_ASSETS {
            return Err(EngineError::InvalidArgument);
        }

        let mut by_asset = BTreeMap::new();
        for (asset, feed) in assets.iter().zip(feeds.iter()) {
            if by_asset.insert(*asset, *feed).is_some() {
                return Err(EngineError::InvalidArgument);
            }
        }

        Ok(Self {
            assets,
            feeds: by_asset,
        })
    }

    pub fn contains(&self, asset: &Pubkey) -> bool {
        self.feeds.contains_key(asset)
    }

    /// Price feed registered for `asset`.
    pub fn feed(&self, asset: &Pubkey) -> Result<&Pubkey, EngineError> {
        self.feeds.get(asset).ok_or(EngineError::NotAllowedAsset)
    }

    pub fn assets(&self) -> &[Pubkey] {
        &self.assets
    }
}
