//! Settlement engine for shared group expenses.
//!
//! [`balance`] reduces a group's ledger to one net balance per member and
//! [`exchange`] turns those balances into the payments that settle them.
//! [`service::SettlementService`] ties both to a [`store::LedgerStore`] and is
//! served over HTTP by the binary.

pub mod balance;
pub mod error;
pub mod exchange;
pub mod money;
pub mod mongo;
pub mod routes;
pub mod schemas;
pub mod service;
pub mod settings;
pub mod store;

pub use error::{Error, Result};
pub use money::Cents;
