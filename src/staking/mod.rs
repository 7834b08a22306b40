use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ledger::{build_merkle, Address, Amount, Ledger, LedgerError};

/// Handle under which a ledger is shared between its direct users and a
/// vault. All mutations on one ledger serialize through this lock.
pub type SharedLedger = Arc<Mutex<Ledger>>;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("stake and unstake amounts must be positive")]
    ZeroAmount,
    #[error("insufficient stake in account {account}")]
    InsufficientStake { account: Address },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultEvent {
    Staked { account: Address, amount: Amount },
    Unstaked { account: Address, amount: Amount },
}

/// Custodies ledger value on behalf of staking accounts.
///
/// The vault is an ordinary ledger client: funds enter through the
/// allowance-gated `transfer_from` path into the vault's own account (the
/// custody pool) and leave through a plain `transfer` back out. The pool
/// therefore always covers `total_staked`.
pub struct StakingVault {
    staking_token: SharedLedger,
    vault_address: Address,
    balances: BTreeMap<Address, Amount>,
    total_staked: Amount,
    events: Vec<VaultEvent>,
}

impl StakingVault {
    /// Binds the vault to one ledger and the ledger account it custodies
    /// funds under. The binding is fixed for the vault's lifetime.
    pub fn new(staking_token: SharedLedger, vault_address: Address) -> Self {
        Self {
            staking_token,
            vault_address,
            balances: BTreeMap::new(),
            total_staked: 0,
            events: Vec::new(),
        }
    }

    pub fn vault_address(&self) -> &Address {
        &self.vault_address
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn total_staked(&self) -> Amount {
        self.total_staked
    }

    pub fn events(&self) -> &[VaultEvent] {
        &self.events
    }

    /// Locks `amount` of `account`'s spendable balance in the vault.
    ///
    /// The account must have approved the vault address for at least
    /// `amount` beforehand; otherwise the underlying ledger failure
    /// propagates unchanged. The ledger transfer and the stake bookkeeping
    /// apply together or not at all.
    pub fn stake(&mut self, account: &Address, amount: Amount) -> Result<(), VaultError> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let new_stake = self
            .balance_of(account)
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let new_total = self
            .total_staked
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        self.lock_ledger()
            .transfer_from(&self.vault_address, account, &self.vault_address, amount)?;
        self.balances.insert(account.clone(), new_stake);
        self.total_staked = new_total;
        self.events.push(VaultEvent::Staked {
            account: account.clone(),
            amount,
        });
        Ok(())
    }

    /// Releases `amount` of `account`'s stake back to its spendable balance.
    ///
    /// The stake is validated first and the return transfer runs before the
    /// bookkeeping decrement, so a failure at any point leaves every
    /// observable untouched.
    pub fn unstake(&mut self, account: &Address, amount: Amount) -> Result<(), VaultError> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let staked = self.balance_of(account);
        if staked < amount {
            return Err(VaultError::InsufficientStake {
                account: account.clone(),
            });
        }
        self.lock_ledger()
            .transfer(&self.vault_address, account, amount)?;
        self.balances.insert(account.clone(), staked - amount);
        // total_staked is the sum of all stakes, so it covers any single one
        self.total_staked -= amount;
        self.events.push(VaultEvent::Unstaked {
            account: account.clone(),
            amount,
        });
        Ok(())
    }

    pub fn snapshot(&self) -> VaultSnapshot {
        VaultSnapshot {
            vault_address: self.vault_address.clone(),
            total_staked: self.total_staked,
            balances: self.balances.clone(),
            events: self.events.clone(),
            state_root: compute_stake_root(self.total_staked, &self.balances),
        }
    }

    // Ledger mutations are validate-then-commit, so state behind a poisoned
    // lock is still consistent and the guard can be recovered.
    fn lock_ledger(&self) -> MutexGuard<'_, Ledger> {
        self.staking_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultSnapshot {
    pub vault_address: Address,
    pub total_staked: Amount,
    pub balances: BTreeMap<Address, Amount>,
    pub events: Vec<VaultEvent>,
    pub state_root: [u8; 32],
}

impl VaultSnapshot {
    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root)
    }
}

fn compute_stake_root(total_staked: Amount, balances: &BTreeMap<Address, Amount>) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    let mut hasher = Sha256::new();
    hasher.update(b"total");
    hasher.update(total_staked.to_le_bytes());
    leaves.push(hasher.finalize().into());
    for (account, staked) in balances {
        let mut hasher = Sha256::new();
        hasher.update(b"stake");
        hasher.update(account.as_str().as_bytes());
        hasher.update(staked.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}
