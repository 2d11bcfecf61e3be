use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Cents;

pub type UserId = String;
pub type GroupId = String;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub expenses: Vec<Expense>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Expense {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub amount: Cents,
    pub paid_by: UserId,
    pub shares: Vec<ExpenseShare>,
    /// Settled expenses are left out of balances entirely, whatever the
    /// state of their shares.
    #[serde(default)]
    pub is_settled: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ExpenseShare {
    pub user_id: UserId,
    pub amount_owed: Cents,
    #[serde(default)]
    pub is_paid: bool,
}

/// Signed position of one member in a group: positive when the group owes
/// them, negative when they owe the group.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetBalance {
    pub user_id: UserId,
    pub amount: Cents,
}

impl NetBalance {
    pub fn new(user_id: impl Into<UserId>, amount: Cents) -> Self {
        Self {
            user_id: user_id.into(),
            amount,
        }
    }
}

/// A settlement transaction as stored once a plan has been accepted.
///
/// Only `is_confirmed` ever changes after insertion, and only from `false`
/// to `true` at the request of the payer.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SettlementRecord {
    pub id: String,
    pub group_id: GroupId,
    pub payer_id: UserId,
    pub receiver_id: UserId,
    pub amount: Cents,
    pub is_confirmed: bool,
    pub created_at: DateTime<Utc>,
}
