//! Accounting core for a single fungible asset and the stake locked in it.
//!
//! Two composed components:
//!
//! * [`ledger`] — balances, total supply, and an allowance-gated spend model;
//!   every mutation is checked and atomic, arithmetic never wraps.
//! * [`staking`] — a vault that moves value between an account's spendable
//!   ledger balance and its locked stake, acting as an ordinary ledger
//!   client through the transfer/allowance interface.
//!
//! Who may call an operation (identity, signing) and how state is made
//! durable are left to the host; this crate is the state machine only.

pub mod ledger;
pub mod staking;

pub use ledger::{Address, Amount, Ledger, LedgerError, LedgerEvent, LedgerSnapshot};
pub use staking::{SharedLedger, StakingVault, VaultError, VaultEvent, VaultSnapshot};
