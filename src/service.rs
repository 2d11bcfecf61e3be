use std::sync::Arc;

use bson::oid::ObjectId;
use chrono::Utc;
use serde::Serialize;

use crate::balance::{compute_balances, member_summary, outstanding_balances, MemberSummary};
use crate::error::{Error, Result};
use crate::exchange::{pairwise_exchanges, simplify, SettlementTransaction};
use crate::money::Cents;
use crate::schemas::{Expense, GroupId, NetBalance, SettlementRecord};
use crate::store::LedgerStore;

/// A settlement plan for one group, before it is persisted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SettlementPlan {
    pub group_id: GroupId,
    pub transactions: Vec<SettlementTransaction>,
    /// How many payments settling pair by pair would have taken.
    pub pairwise_count: usize,
    pub total_amount: Cents,
}

pub struct SettlementService {
    store: Arc<dyn LedgerStore>,
    epsilon: Cents,
}

impl SettlementService {
    pub fn new(store: Arc<dyn LedgerStore>, epsilon: Cents) -> Self {
        Self { store, epsilon }
    }

    async fn ledger(&self, group_id: &str) -> Result<Vec<Expense>> {
        self.store
            .group_expenses(group_id)
            .await?
            .ok_or_else(|| Error::GroupNotFound(group_id.to_string()))
    }

    fn plan(&self, group_id: &str, expenses: &[Expense]) -> SettlementPlan {
        let balances = compute_balances(expenses, self.epsilon);
        let transactions = simplify(&balances, self.epsilon);
        let pairwise_count = pairwise_exchanges(expenses, self.epsilon).len();
        let total_amount: Cents = transactions.iter().map(|t| t.amount).sum();

        tracing::info!(
            group = group_id,
            members = balances.len(),
            transactions = transactions.len(),
            pairwise = pairwise_count,
            total = %total_amount,
            "computed settlement plan"
        );

        SettlementPlan {
            group_id: group_id.to_string(),
            transactions,
            pairwise_count,
            total_amount,
        }
    }

    pub async fn balances(&self, group_id: &str) -> Result<Vec<NetBalance>> {
        let expenses = self.ledger(group_id).await?;
        Ok(compute_balances(&expenses, self.epsilon))
    }

    pub async fn member_balance(&self, group_id: &str, member: &str) -> Result<MemberSummary> {
        let expenses = self.ledger(group_id).await?;
        Ok(member_summary(&expenses, member, self.epsilon))
    }

    /// Computes the plan without storing anything.
    pub async fn calculate(&self, group_id: &str) -> Result<SettlementPlan> {
        let expenses = self.ledger(group_id).await?;
        Ok(self.plan(group_id, &expenses))
    }

    /// Stores unconfirmed records for whatever the group still owes.
    ///
    /// The plan covers the ledger net of every settlement already recorded
    /// for the group, so running this again before the ledger changes
    /// stores nothing. Reading the ledger and storing the records happen as
    /// one unit of the store, which makes concurrent runs and ledger edits
    /// land either wholly before or wholly after a run.
    pub async fn create(&self, group_id: &str) -> Result<Vec<SettlementRecord>> {
        let epsilon = self.epsilon;
        let plan = |expenses: &[Expense], recorded: &[SettlementRecord]| {
            let balances = outstanding_balances(expenses, recorded, epsilon);
            let created_at = Utc::now();
            simplify(&balances, epsilon)
                .into_iter()
                .map(|t| SettlementRecord {
                    id: ObjectId::new().to_hex(),
                    group_id: group_id.to_string(),
                    payer_id: t.payer_id,
                    receiver_id: t.receiver_id,
                    amount: t.amount,
                    is_confirmed: false,
                    created_at,
                })
                .collect::<Vec<_>>()
        };

        let records = self
            .store
            .record_settlements(group_id, &plan)
            .await?
            .ok_or_else(|| Error::GroupNotFound(group_id.to_string()))?;

        let total_amount: Cents = records.iter().map(|r| r.amount).sum();
        tracing::info!(
            group = group_id,
            count = records.len(),
            total = %total_amount,
            "stored settlements"
        );
        Ok(records)
    }

    pub async fn list(&self, group_id: &str) -> Result<Vec<SettlementRecord>> {
        self.ledger(group_id).await?;
        self.store.group_settlements(group_id).await
    }

    /// Marks a settlement as paid. Only its payer may do so.
    pub async fn confirm(&self, settlement_id: &str, acting_user: &str) -> Result<SettlementRecord> {
        let mut record = self
            .store
            .find_settlement(settlement_id)
            .await?
            .ok_or_else(|| Error::SettlementNotFound(settlement_id.to_string()))?;

        if record.payer_id != acting_user {
            tracing::warn!(
                settlement = settlement_id,
                user = acting_user,
                "confirmation refused, user is not the payer"
            );
            return Err(Error::Forbidden);
        }

        if !record.is_confirmed {
            self.store.confirm_settlement(settlement_id).await?;
            record.is_confirmed = true;
            tracing::info!(settlement = settlement_id, "settlement confirmed");
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{ExpenseShare, Group};
    use crate::store::MemoryStore;

    fn share(user: &str, owed: i64) -> ExpenseShare {
        ExpenseShare {
            user_id: user.to_string(),
            amount_owed: Cents::new(owed),
            is_paid: false,
        }
    }

    fn expense(id: &str, paid_by: &str, amount: i64, shares: Vec<ExpenseShare>) -> Expense {
        Expense {
            id: id.to_string(),
            name: format!("expense {id}"),
            amount: Cents::new(amount),
            paid_by: paid_by.to_string(),
            shares,
            is_settled: false,
        }
    }

    fn trip() -> Group {
        let mut museum = expense("2", "bob", 2000, vec![share("alice", 1000), share("bob", 1000)]);
        museum.is_settled = true;
        Group {
            id: "trip".to_string(),
            name: "Trip".to_string(),
            expenses: vec![
                expense("1", "carol", 4000, vec![share("alice", 3000), share("bob", 1000)]),
                museum,
            ],
        }
    }

    fn trip_with(extra: Expense) -> Group {
        let mut group = trip();
        group.expenses.push(extra);
        group
    }

    fn service_with_trip() -> (SettlementService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_groups([trip()]));
        let service = SettlementService::new(store.clone(), Cents::new(1));
        (service, store)
    }

    fn transfers(records: &[SettlementRecord]) -> Vec<(&str, &str, i64)> {
        records
            .iter()
            .map(|r| (r.payer_id.as_str(), r.receiver_id.as_str(), r.amount.cents()))
            .collect()
    }

    async fn nothing_outstanding(store: &MemoryStore) -> bool {
        let expenses = store.group_expenses("trip").await.unwrap().unwrap();
        let recorded = store.group_settlements("trip").await.unwrap();
        outstanding_balances(&expenses, &recorded, Cents::new(1)).is_empty()
    }

    #[actix_web::test]
    async fn balances_skip_settled_expenses() {
        let (service, _) = service_with_trip();
        assert_eq!(
            service.balances("trip").await.unwrap(),
            vec![
                NetBalance::new("alice", Cents::new(-3000)),
                NetBalance::new("bob", Cents::new(-1000)),
                NetBalance::new("carol", Cents::new(4000)),
            ]
        );
    }

    #[actix_web::test]
    async fn unknown_group_is_not_found() {
        let (service, _) = service_with_trip();
        assert!(matches!(
            service.calculate("nope").await,
            Err(Error::GroupNotFound(_))
        ));
        assert!(matches!(service.list("nope").await, Err(Error::GroupNotFound(_))));
    }

    #[actix_web::test]
    async fn create_for_unknown_group_stores_nothing() {
        let (service, store) = service_with_trip();
        for _ in 0..100 {
            assert!(matches!(
                service.create("nope").await,
                Err(Error::GroupNotFound(_))
            ));
        }
        assert_eq!(store.group_count().await, 1);
        assert!(store.group_settlements("nope").await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn calculate_does_not_persist() {
        let (service, store) = service_with_trip();
        let plan = service.calculate("trip").await.unwrap();

        assert_eq!(
            plan.transactions,
            vec![
                SettlementTransaction::new("alice", "carol", Cents::new(3000)),
                SettlementTransaction::new("bob", "carol", Cents::new(1000)),
            ]
        );
        assert_eq!(plan.pairwise_count, 2);
        assert_eq!(plan.total_amount, Cents::new(4000));
        assert!(store.group_settlements("trip").await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn create_stores_unconfirmed_records() {
        let (service, _) = service_with_trip();
        let created = service.create("trip").await.unwrap();

        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|r| !r.is_confirmed && r.group_id == "trip"));
        assert_eq!(service.list("trip").await.unwrap(), created);
    }

    #[actix_web::test]
    async fn create_again_stores_nothing_new() {
        let (service, _) = service_with_trip();
        assert_eq!(service.create("trip").await.unwrap().len(), 2);
        assert!(service.create("trip").await.unwrap().is_empty());
        assert_eq!(service.list("trip").await.unwrap().len(), 2);
    }

    #[actix_web::test]
    async fn concurrent_creates_store_a_single_plan() {
        let (service, store) = service_with_trip();

        let runs = futures::future::join_all((0..8).map(|_| service.create("trip"))).await;
        let runs: Vec<Vec<SettlementRecord>> = runs.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(runs.iter().filter(|r| !r.is_empty()).count(), 1);
        let stored = store.group_settlements("trip").await.unwrap();
        assert_eq!(
            transfers(&stored),
            vec![("alice", "carol", 3000), ("bob", "carol", 1000)]
        );
        assert!(nothing_outstanding(&store).await);
    }

    #[actix_web::test]
    async fn create_racing_a_ledger_edit_uses_one_snapshot() {
        let (service, store) = service_with_trip();
        // alice pays carol back for the hotel directly
        let edited = trip_with(expense("3", "alice", 3000, vec![share("carol", 3000)]));

        let (created, ()) = futures::join!(service.create("trip"), store.put_group(edited));
        let created = created.unwrap();

        let before_edit = vec![("alice", "carol", 3000), ("bob", "carol", 1000)];
        let after_edit = vec![("bob", "carol", 1000)];
        let created = transfers(&created);
        assert!(
            created == before_edit || created == after_edit,
            "plan mixes two ledgers: {created:?}"
        );

        service.create("trip").await.unwrap();
        assert!(nothing_outstanding(&store).await);
    }

    #[actix_web::test]
    async fn create_after_new_expense_covers_only_the_difference() {
        let (service, store) = service_with_trip();
        service.create("trip").await.unwrap();

        store
            .put_group(trip_with(expense("3", "dave", 500, vec![share("bob", 500)])))
            .await;
        let created = service.create("trip").await.unwrap();

        assert_eq!(transfers(&created), vec![("bob", "dave", 500)]);
        assert_eq!(service.list("trip").await.unwrap().len(), 3);
    }

    #[actix_web::test]
    async fn only_the_payer_can_confirm() {
        let (service, _) = service_with_trip();
        let created = service.create("trip").await.unwrap();
        let id = created[0].id.clone();

        assert!(matches!(
            service.confirm(&id, "carol").await,
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            service.confirm("missing", "alice").await,
            Err(Error::SettlementNotFound(_))
        ));

        let confirmed = service.confirm(&id, "alice").await.unwrap();
        assert!(confirmed.is_confirmed);
        // confirming twice is harmless
        assert!(service.confirm(&id, "alice").await.unwrap().is_confirmed);

        let stored = service.list("trip").await.unwrap();
        assert!(stored[0].is_confirmed);
        assert!(!stored[1].is_confirmed);
    }

    #[actix_web::test]
    async fn member_balance_reports_totals() {
        let (service, _) = service_with_trip();
        let summary = service.member_balance("trip", "carol").await.unwrap();
        assert_eq!(summary.total_paid, Cents::new(4000));
        assert_eq!(summary.total_owed, Cents::ZERO);
        assert_eq!(summary.balance, Cents::new(4000));
    }
}
