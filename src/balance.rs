use std::collections::BTreeMap;

use serde::Serialize;

use crate::money::Cents;
use crate::schemas::{Expense, ExpenseShare, NetBalance, SettlementRecord, UserId};

type Balance = BTreeMap<UserId, Cents>;

// Credits every payer with the full expense amount and debits every unpaid
// share. Paid shares are already settled and never re-enter the balance.
fn ledger_positions(expenses: &[Expense]) -> Balance {
    let mut balance = Balance::new();
    for expense in expenses.iter().filter(|e| !e.is_settled) {
        let amount = expense.amount;
        balance
            .entry(expense.paid_by.clone())
            .and_modify(|v| *v += amount)
            .or_insert(amount);
        for share in expense.shares.iter().filter(|s| !s.is_paid) {
            let owed = share.amount_owed;
            balance
                .entry(share.user_id.clone())
                .and_modify(|v| *v -= owed)
                .or_insert(-owed);
        }
    }
    balance
}

/// Reduces a group's ledger to one net balance per member, ordered by member
/// id. Balances within `epsilon` of zero are dropped.
pub fn compute_balances(expenses: &[Expense], epsilon: Cents) -> Vec<NetBalance> {
    ledger_positions(expenses)
        .into_iter()
        .filter(|(_, amount)| !amount.is_negligible(epsilon))
        .map(|(user_id, amount)| NetBalance { user_id, amount })
        .collect()
}

/// Balances still left to settle once the settlements already recorded for
/// the group are counted as paid.
///
/// A recorded settlement moves its amount from the receiver's balance to the
/// payer's, whether or not it has been confirmed yet, so a group that has
/// been settled once yields no balances until its ledger changes again.
pub fn outstanding_balances(
    expenses: &[Expense],
    recorded: &[SettlementRecord],
    epsilon: Cents,
) -> Vec<NetBalance> {
    let mut balance = ledger_positions(expenses);
    for record in recorded {
        let amount = record.amount;
        balance
            .entry(record.payer_id.clone())
            .and_modify(|v| *v += amount)
            .or_insert(amount);
        balance
            .entry(record.receiver_id.clone())
            .and_modify(|v| *v -= amount)
            .or_insert(-amount);
    }
    balance
        .into_iter()
        .filter(|(_, amount)| !amount.is_negligible(epsilon))
        .map(|(user_id, amount)| NetBalance { user_id, amount })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    /// Others owe this member.
    Owed,
    /// This member owes others.
    Owes,
    Settled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemberSummary {
    pub user_id: UserId,
    pub total_paid: Cents,
    pub total_owed: Cents,
    pub balance: Cents,
    pub status: MemberStatus,
}

/// What a single member paid and still owes across the open expenses of a
/// group.
pub fn member_summary(expenses: &[Expense], member: &str, epsilon: Cents) -> MemberSummary {
    let open = expenses.iter().filter(|e| !e.is_settled);
    let total_paid = open
        .clone()
        .filter(|e| e.paid_by == member)
        .map(|e| e.amount)
        .sum::<Cents>();
    let total_owed = open
        .flat_map(|e| e.shares.iter())
        .filter(|s| !s.is_paid && s.user_id == member)
        .map(|s| s.amount_owed)
        .sum::<Cents>();
    let balance = total_paid - total_owed;

    let status = if balance > epsilon {
        MemberStatus::Owed
    } else if balance < -epsilon {
        MemberStatus::Owes
    } else {
        MemberStatus::Settled
    };

    MemberSummary {
        user_id: member.to_string(),
        total_paid,
        total_owed,
        balance,
        status,
    }
}

/// Splits `amount` evenly between `members`.
///
/// The leftover cents of the division go one each to the first members in
/// the given order, so the shares always add up to `amount` exactly.
pub fn split_evenly(amount: Cents, members: &[UserId]) -> Vec<ExpenseShare> {
    if members.is_empty() {
        return Vec::new();
    }
    let count = members.len() as i64;
    let base = amount.cents().div_euclid(count);
    let remainder = amount.cents().rem_euclid(count) as usize;

    members
        .iter()
        .enumerate()
        .map(|(i, user_id)| ExpenseShare {
            user_id: user_id.clone(),
            amount_owed: Cents::new(base + i64::from(i < remainder)),
            is_paid: false,
        })
        .collect()
}
