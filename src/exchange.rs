use std::collections::HashMap;
use std::mem::swap;

use serde::{Deserialize, Serialize};

use crate::money::Cents;
use crate::schemas::{Expense, NetBalance, UserId};

#[derive(Clone, Debug)]
struct PersonalBalance {
    id: UserId,
    balance: Cents,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
struct UserPair {
    user1: UserId,
    user2: UserId,
}

/// One payment of a settlement plan.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SettlementTransaction {
    pub payer_id: UserId,
    pub receiver_id: UserId,
    pub amount: Cents,
}

impl SettlementTransaction {
    pub fn new(payer_id: impl Into<UserId>, receiver_id: impl Into<UserId>, amount: Cents) -> Self {
        Self {
            payer_id: payer_id.into(),
            receiver_id: receiver_id.into(),
            amount,
        }
    }
}

/// Warns when the balances of a group do not cancel out.
///
/// A non-zero sum means the ledger handed to the matcher is inconsistent;
/// the plan is still computed from it unchanged. Returns the residual.
pub fn check_zero_sum(balances: &[NetBalance], epsilon: Cents) -> Cents {
    let residual: Cents = balances.iter().map(|b| b.amount).sum();
    let tolerance = Cents::new(epsilon.cents() * balances.len().max(1) as i64);
    if residual.abs() > tolerance {
        tracing::warn!(
            %residual,
            members = balances.len(),
            "net balances do not sum to zero, settlement plan will leave residue"
        );
    }
    residual
}

// Most negative balance first, ties broken by the smaller id.
fn largest_debtor(balances: &[PersonalBalance], epsilon: Cents) -> Option<usize> {
    balances
        .iter()
        .enumerate()
        .filter(|(_, p)| p.balance < -epsilon)
        .min_by(|(_, a), (_, b)| a.balance.cmp(&b.balance).then_with(|| a.id.cmp(&b.id)))
        .map(|(i, _)| i)
}

// Most positive balance first, ties broken by the smaller id.
fn largest_creditor(balances: &[PersonalBalance], epsilon: Cents) -> Option<usize> {
    balances
        .iter()
        .enumerate()
        .filter(|(_, p)| p.balance > epsilon)
        .min_by(|(_, a), (_, b)| b.balance.cmp(&a.balance).then_with(|| a.id.cmp(&b.id)))
        .map(|(i, _)| i)
}

/// Computes the payments that bring every balance back to zero.
///
/// Repeatedly pairs the largest debtor with the largest creditor and moves
/// the smaller of the two amounts between them. Every step clears at least
/// one member, so `n` non-zero balances produce at most `n - 1` payments.
/// Balances within `epsilon` of zero take no part in the plan.
pub fn simplify(balances: &[NetBalance], epsilon: Cents) -> Vec<SettlementTransaction> {
    check_zero_sum(balances, epsilon);

    let mut people: Vec<PersonalBalance> = balances
        .iter()
        .filter(|b| !b.amount.is_negligible(epsilon))
        .map(|b| PersonalBalance {
            id: b.user_id.clone(),
            balance: b.amount,
        })
        .collect();

    let mut exchanges = Vec::new();

    while let (Some(payer), Some(receiver)) = (
        largest_debtor(&people, epsilon),
        largest_creditor(&people, epsilon),
    ) {
        let amount = (-people[payer].balance).min(people[receiver].balance);

        exchanges.push(SettlementTransaction {
            payer_id: people[payer].id.clone(),
            receiver_id: people[receiver].id.clone(),
            amount,
        });

        people[payer].balance += amount;
        people[receiver].balance -= amount;
        people.retain(|p| !p.balance.is_negligible(epsilon));
    }

    if let Some(left) = people.first() {
        tracing::debug!(
            member = %left.id,
            balance = %left.balance,
            "balance left unsettled"
        );
    }

    exchanges
}

/// The payments that would be made if no simplification happened: every
/// member pays each payer they owe directly, netted per pair of members.
pub fn pairwise_exchanges(expenses: &[Expense], epsilon: Cents) -> Vec<SettlementTransaction> {
    let mut balances_between_people: HashMap<UserPair, Cents> = HashMap::new();

    for expense in expenses.iter().filter(|e| !e.is_settled) {
        for share in expense.shares.iter().filter(|s| !s.is_paid) {
            if share.user_id == expense.paid_by {
                continue;
            }
            let mut pair = UserPair {
                user1: expense.paid_by.clone(),
                user2: share.user_id.clone(),
            };
            let mut amount = share.amount_owed;

            // Alphabetical order keeps both directions of a pair under one key
            if pair.user1 > pair.user2 {
                swap(&mut pair.user1, &mut pair.user2);
                amount = -amount;
            }

            balances_between_people
                .entry(pair)
                .and_modify(|balance| *balance += amount)
                .or_insert(amount);
        }
    }

    // user1 is owed a positive balance, so user2 pays it
    let mut exchanges: Vec<SettlementTransaction> = balances_between_people
        .into_iter()
        .filter(|(_, balance)| !balance.is_negligible(epsilon))
        .map(|(pair, balance)| {
            let mut payer = pair.user2;
            let mut receiver = pair.user1;
            if balance.is_negative() {
                swap(&mut payer, &mut receiver);
            }
            SettlementTransaction {
                payer_id: payer,
                receiver_id: receiver,
                amount: balance.abs(),
            }
        })
        .collect();

    exchanges.sort_by(|a, b| {
        a.payer_id
            .cmp(&b.payer_id)
            .then_with(|| a.receiver_id.cmp(&b.receiver_id))
    });
    exchanges
}
