// oracle-core/src/balances.rs

use crate::{Amount, CoreError, CoreResult};
use oracle_crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Liquid (unstaked) token balances
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balances {
    accounts: BTreeMap<Address, Amount>,
    total_supply: Amount,
    total_burned: Amount,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, address: &Address) -> Amount {
        self.accounts.get(address).cloned().unwrap_or_default()
    }

    pub fn total_supply(&self) -> &Amount {
        &self.total_supply
    }

    pub fn total_burned(&self) -> &Amount {
        &self.total_burned
    }

    /// Create new tokens on `address`
    pub fn mint(&mut self, address: Address, amount: &Amount) -> CoreResult<()> {
        let supply = self.total_supply.checked_add(amount)
            .ok_or_else(|| CoreError::Overflow("total supply".into()))?;
        self.credit(address, amount)?;
        self.total_supply = supply;
        Ok(())
    }

    /// Add already-existing tokens (returned stake, bounties) to `address`
    pub fn credit(&mut self, address: Address, amount: &Amount) -> CoreResult<()> {
        let balance = self.balance_of(&address).checked_add(amount)
            .ok_or_else(|| CoreError::Overflow(format!("balance of {address}")))?;
        self.accounts.insert(address, balance);
        Ok(())
    }

    /// Remove tokens from `address` so they can be locked elsewhere
    pub fn debit(&mut self, address: Address, amount: &Amount) -> CoreResult<()> {
        let available = self.balance_of(&address);
        let remaining = available.checked_sub(amount)
            .ok_or_else(|| CoreError::InsufficientBalance {
                address,
                required: amount.clone(),
                available: available.clone(),
            })?;
        self.accounts.insert(address, remaining);
        Ok(())
    }

    /// Account for tokens destroyed outside any balance (slashing remainder)
    pub fn burn(&mut self, amount: &Amount) -> CoreResult<()> {
        let burned = self.total_burned.checked_add(amount)
            .ok_or_else(|| CoreError::Overflow("total burned".into()))?;
        self.total_supply = self.total_supply.saturating_sub(amount);
        self.total_burned = burned;
        Ok(())
    }

    /// Account for tokens created outside any balance (block rewards)
    pub fn record_issuance(&mut self, amount: &Amount) -> CoreResult<()> {
        self.total_supply = self.total_supply.checked_add(amount)
            .ok_or_else(|| CoreError::Overflow("total supply".into()))?;
        Ok(())
    }

    /// Undo a `record_issuance` whose cause was reverted
    pub fn revoke_issuance(&mut self, amount: &Amount) -> CoreResult<()> {
        self.total_supply = self.total_supply.checked_sub(amount)
            .ok_or_else(|| CoreError::Overflow("revoked issuance exceeds supply".into()))?;
        Ok(())
    }
}
