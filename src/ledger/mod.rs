use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Amount = u128;

/// Opaque account identifier. The zero address is a sentinel that can never
/// hold value; mints and transfers targeting it are rejected.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn zero() -> Self {
        Self(String::new())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            f.write_str("<zero>")
        } else {
            f.write_str(&self.0)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("the zero address cannot receive value")]
    InvalidRecipient,
    #[error("insufficient balance in account {account}")]
    InsufficientBalance { account: Address },
    #[error("allowance from {owner} to {spender} does not cover the requested amount")]
    InsufficientAllowance { owner: Address, spender: Address },
    #[error("amount overflows the ledger arithmetic domain")]
    ArithmeticOverflow,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Mint {
        to: Address,
        amount: Amount,
    },
    Transfer {
        from: Address,
        to: Address,
        amount: Amount,
    },
    Approval {
        owner: Address,
        spender: Address,
        amount: Amount,
    },
}

/// Balances, total supply, and allowances for one fungible asset.
///
/// Every mutating operation either applies in full or leaves the ledger
/// exactly as it was; arithmetic never wraps. `total_supply` equals the sum
/// of all balances at all times.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ledger {
    name: String,
    symbol: String,
    total_supply: Amount,
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
    events: Vec<LedgerEvent>,
}

impl Ledger {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            total_supply: 0,
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|granted| granted.get(spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Creates `amount` new units in `to`'s balance. Open to any caller; the
    /// only guard is the zero-address check, which applies even when the
    /// amount is zero.
    pub fn mint(&mut self, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        if to.is_zero() {
            return Err(LedgerError::InvalidRecipient);
        }
        let new_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let new_balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        self.total_supply = new_supply;
        self.balances.insert(to.clone(), new_balance);
        self.events.push(LedgerEvent::Mint {
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    /// Sets the allowance of `spender` over `owner`'s balance to exactly
    /// `amount` (absolute set, not additive).
    pub fn approve(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.allowances
            .entry(owner.clone())
            .or_default()
            .insert(spender.clone(), amount);
        self.events.push(LedgerEvent::Approval {
            owner: owner.clone(),
            spender: spender.clone(),
            amount,
        });
        Ok(())
    }

    pub fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.move_value(from, to, amount)?;
        self.events.push(LedgerEvent::Transfer {
            from: from.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    /// Spends `amount` of `owner`'s balance on behalf of `spender`, sending
    /// it to `to`. The allowance is checked before any mutation and is
    /// decremented by exactly `amount` on success.
    pub fn transfer_from(
        &mut self,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let allowed = self.allowance(owner, spender);
        if allowed < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: owner.clone(),
                spender: spender.clone(),
            });
        }
        self.move_value(owner, to, amount)?;
        self.allowances
            .entry(owner.clone())
            .or_default()
            .insert(spender.clone(), allowed - amount);
        self.events.push(LedgerEvent::Transfer {
            from: owner.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            total_supply: self.total_supply,
            balances: self.balances.clone(),
            allowances: self.allowances.clone(),
            events: self.events.clone(),
            state_root: compute_state_root(self.total_supply, &self.balances, &self.allowances),
        }
    }

    // All checks happen before the first insert so a failure mutates nothing.
    fn move_value(
        &mut self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if to.is_zero() {
            return Err(LedgerError::InvalidRecipient);
        }
        let from_balance = self.balance_of(from);
        if from_balance < amount {
            return Err(LedgerError::InsufficientBalance {
                account: from.clone(),
            });
        }
        if from == to {
            // no net movement
            return Ok(());
        }
        let new_to = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        self.balances.insert(from.clone(), from_balance - amount);
        self.balances.insert(to.clone(), new_to);
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub name: String,
    pub symbol: String,
    pub total_supply: Amount,
    pub balances: BTreeMap<Address, Amount>,
    pub allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
    pub events: Vec<LedgerEvent>,
    pub state_root: [u8; 32],
}

impl LedgerSnapshot {
    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root)
    }
}

fn compute_state_root(
    total_supply: Amount,
    balances: &BTreeMap<Address, Amount>,
    allowances: &BTreeMap<Address, BTreeMap<Address, Amount>>,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    let mut hasher = Sha256::new();
    hasher.update(b"supply");
    hasher.update(total_supply.to_le_bytes());
    leaves.push(hasher.finalize().into());
    for (account, balance) in balances {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_str().as_bytes());
        hasher.update(balance.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (owner, granted) in allowances {
        for (spender, amount) in granted {
            let mut hasher = Sha256::new();
            hasher.update(b"allow");
            hasher.update(owner.as_str().as_bytes());
            hasher.update(spender.as_str().as_bytes());
            hasher.update(amount.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
    }
    build_merkle(leaves)
}

pub(crate) fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"stake-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_of_balances(ledger: &Ledger) -> Amount {
        ledger.snapshot().balances.values().sum()
    }

    #[test]
    fn mint_credits_recipient_and_supply() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        ledger.mint(&"user".into(), 100).unwrap();
        assert_eq!(ledger.balance_of(&"user".into()), 100);
        assert_eq!(ledger.total_supply(), 100);
    }

    #[test]
    fn repeated_mints_accumulate() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        ledger.mint(&"user".into(), 100).unwrap();
        ledger.mint(&"user".into(), 150).unwrap();
        assert_eq!(ledger.balance_of(&"user".into()), 250);
        assert_eq!(ledger.total_supply(), 250);
    }

    #[test]
    fn mint_to_zero_address_is_rejected() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        let err = ledger.mint(&Address::zero(), 100).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRecipient));
        assert_eq!(ledger.total_supply(), 0);
        assert!(ledger.events().is_empty());
        // the zero-address guard fires even for a zero amount
        let err = ledger.mint(&Address::zero(), 0).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRecipient));
    }

    #[test]
    fn zero_amount_mint_is_a_supply_noop() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        ledger.mint(&"user".into(), 0).unwrap();
        assert_eq!(ledger.balance_of(&"user".into()), 0);
        assert_eq!(ledger.total_supply(), 0);
    }

    #[test]
    fn approve_sets_absolute_allowance() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        ledger
            .approve(&"user".into(), &"spender".into(), 200)
            .unwrap();
        ledger.mint(&"user".into(), 500).unwrap();
        assert_eq!(ledger.allowance(&"user".into(), &"spender".into()), 200);
        assert_eq!(ledger.balance_of(&"user".into()), 500);
        // a second approve overwrites rather than adds
        ledger
            .approve(&"user".into(), &"spender".into(), 50)
            .unwrap();
        assert_eq!(ledger.allowance(&"user".into(), &"spender".into()), 50);
    }

    #[test]
    fn transfer_moves_value_and_conserves_supply() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        ledger.mint(&"alice".into(), 1_000).unwrap();
        ledger.mint(&"carol".into(), 7).unwrap();
        ledger.transfer(&"alice".into(), &"bob".into(), 400).unwrap();
        assert_eq!(ledger.balance_of(&"alice".into()), 600);
        assert_eq!(ledger.balance_of(&"bob".into()), 400);
        assert_eq!(ledger.balance_of(&"carol".into()), 7);
        assert_eq!(ledger.total_supply(), 1_007);
        assert_eq!(sum_of_balances(&ledger), ledger.total_supply());
    }

    #[test]
    fn transfer_with_insufficient_balance_leaves_state_untouched() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        ledger.mint(&"alice".into(), 50).unwrap();
        let before = ledger.snapshot();
        let err = ledger
            .transfer(&"alice".into(), &"bob".into(), 51)
            .unwrap_err();
        match err {
            LedgerError::InsufficientBalance { account } => {
                assert_eq!(account, "alice".into());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn transfer_to_zero_address_is_rejected() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        ledger.mint(&"alice".into(), 50).unwrap();
        let err = ledger
            .transfer(&"alice".into(), &Address::zero(), 10)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRecipient));
        assert_eq!(ledger.balance_of(&"alice".into()), 50);
    }

    #[test]
    fn self_transfer_changes_nothing_but_is_logged() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        ledger.mint(&"alice".into(), 50).unwrap();
        ledger
            .transfer(&"alice".into(), &"alice".into(), 20)
            .unwrap();
        assert_eq!(ledger.balance_of(&"alice".into()), 50);
        assert_eq!(ledger.total_supply(), 50);
        assert_eq!(ledger.events().len(), 2);
    }

    #[test]
    fn transfer_from_spends_and_decrements_allowance() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        ledger.mint(&"owner".into(), 500).unwrap();
        ledger
            .approve(&"owner".into(), &"spender".into(), 300)
            .unwrap();
        ledger
            .transfer_from(&"spender".into(), &"owner".into(), &"dest".into(), 120)
            .unwrap();
        assert_eq!(ledger.balance_of(&"owner".into()), 380);
        assert_eq!(ledger.balance_of(&"dest".into()), 120);
        assert_eq!(ledger.allowance(&"owner".into(), &"spender".into()), 180);
        assert_eq!(ledger.total_supply(), 500);
    }

    #[test]
    fn transfer_from_without_allowance_fails_before_any_mutation() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        ledger.mint(&"owner".into(), 500).unwrap();
        let before = ledger.snapshot();
        let err = ledger
            .transfer_from(&"spender".into(), &"owner".into(), &"dest".into(), 1)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientAllowance { .. }));
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn transfer_from_with_allowance_but_no_balance_fails() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        ledger.mint(&"owner".into(), 10).unwrap();
        ledger
            .approve(&"owner".into(), &"spender".into(), 100)
            .unwrap();
        let err = ledger
            .transfer_from(&"spender".into(), &"owner".into(), &"dest".into(), 50)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        // the allowance is only consumed on success
        assert_eq!(ledger.allowance(&"owner".into(), &"spender".into()), 100);
        assert_eq!(ledger.balance_of(&"owner".into()), 10);
    }

    #[test]
    fn mint_overflow_is_trapped_atomically() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        ledger.mint(&"alice".into(), Amount::MAX).unwrap();
        let err = ledger.mint(&"bob".into(), 1).unwrap_err();
        assert!(matches!(err, LedgerError::ArithmeticOverflow));
        assert_eq!(ledger.total_supply(), Amount::MAX);
        assert_eq!(ledger.balance_of(&"bob".into()), 0);
    }

    #[test]
    fn state_root_is_deterministic_and_tracks_balances() {
        let mut ledger = Ledger::new("Mock Token", "MOCK");
        ledger.mint(&"alice".into(), 1_000).unwrap();
        ledger.mint(&"bob".into(), 2_000).unwrap();
        let root1 = ledger.snapshot().state_root;
        let root2 = ledger.snapshot().state_root;
        assert_eq!(root1, root2);
        ledger.transfer(&"alice".into(), &"bob".into(), 1).unwrap();
        assert_ne!(ledger.snapshot().state_root, root1);
        assert_eq!(ledger.snapshot().state_root_hex().len(), 64);
    }

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = LedgerEvent::Mint {
            to: "user".into(),
            amount: 100,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "mint");
        assert_eq!(value["to"], "user");
        assert_eq!(value["amount"], 100);
    }
}
