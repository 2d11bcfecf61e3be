use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::doc,
    error::TRANSIENT_TRANSACTION_ERROR,
    options::FindOptions,
    Client, ClientSession, Collection,
};

use crate::error::{Error, Result};
use crate::schemas::{Expense, Group, SettlementRecord};
use crate::store::{LedgerStore, PlanFn};

const TRANSACTION_ATTEMPTS: u32 = 3;

/// Groups live in `Groups` with their expenses embedded, settlement records
/// in `Settlements`.
///
/// Recording settlements runs in a multi-document transaction, so the
/// server must be a replica set or a sharded cluster.
pub struct MongoStore {
    client: Client,
    groups: Collection<Group>,
    settlements: Collection<SettlementRecord>,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(database);
        Ok(Self {
            groups: db.collection("Groups"),
            settlements: db.collection("Settlements"),
            client,
        })
    }

    fn by_age() -> FindOptions {
        FindOptions::builder().sort(doc! { "_id": 1 }).build()
    }

    // Bumping `settlement_version` on the group document makes any write to
    // the same group, ledger edit or concurrent recording, conflict with
    // this transaction until it commits.
    async fn record_in_session(
        &self,
        session: &mut ClientSession,
        group_id: &str,
        plan: PlanFn<'_>,
    ) -> Result<Option<Vec<SettlementRecord>>> {
        let group = self
            .groups
            .find_one_and_update_with_session(
                doc! { "id": group_id },
                doc! { "$inc": { "settlement_version": 1 } },
                None,
                session,
            )
            .await?;
        let Some(group) = group else {
            return Ok(None);
        };

        let mut cursor = self
            .settlements
            .find_with_session(doc! { "group_id": group_id }, Self::by_age(), session)
            .await?;
        let recorded: Vec<SettlementRecord> = cursor.stream(session).try_collect().await?;

        let records = plan(&group.expenses, &recorded);
        if !records.is_empty() {
            self.settlements
                .insert_many_with_session(&records, None, session)
                .await?;
        }
        Ok(Some(records))
    }

    async fn record_once(
        &self,
        session: &mut ClientSession,
        group_id: &str,
        plan: PlanFn<'_>,
    ) -> Result<Option<Vec<SettlementRecord>>> {
        session.start_transaction(None).await?;
        match self.record_in_session(session, group_id, plan).await {
            Ok(records) => {
                session.commit_transaction().await?;
                Ok(records)
            }
            Err(err) => {
                if let Err(abort) = session.abort_transaction().await {
                    tracing::debug!(group = group_id, "abort failed: {abort}");
                }
                Err(err)
            }
        }
    }
}

// Records arrive in `_id` order, which only follows insertion within one
// process. `created_at` decides; the stable sort keeps `_id` order for the
// records of one plan, which share a timestamp.
fn oldest_first(mut records: Vec<SettlementRecord>) -> Vec<SettlementRecord> {
    records.sort_by_key(|r| r.created_at);
    records
}

#[async_trait]
impl LedgerStore for MongoStore {
    async fn group_expenses(&self, group_id: &str) -> Result<Option<Vec<Expense>>> {
        let group = self.groups.find_one(doc! { "id": group_id }, None).await?;
        Ok(group.map(|g| g.expenses))
    }

    async fn record_settlements(
        &self,
        group_id: &str,
        plan: PlanFn<'_>,
    ) -> Result<Option<Vec<SettlementRecord>>> {
        let mut session = self.client.start_session(None).await?;
        let mut attempt = 1;
        loop {
            match self.record_once(&mut session, group_id, plan).await {
                Err(Error::Database(err))
                    if attempt < TRANSACTION_ATTEMPTS
                        && err.contains_label(TRANSIENT_TRANSACTION_ERROR) =>
                {
                    tracing::warn!(group = group_id, attempt, "retrying settlement transaction: {err}");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn group_settlements(&self, group_id: &str) -> Result<Vec<SettlementRecord>> {
        let cursor = self
            .settlements
            .find(doc! { "group_id": group_id }, Self::by_age())
            .await?;
        Ok(oldest_first(cursor.try_collect().await?))
    }

    async fn find_settlement(&self, id: &str) -> Result<Option<SettlementRecord>> {
        Ok(self.settlements.find_one(doc! { "id": id }, None).await?)
    }

    async fn confirm_settlement(&self, id: &str) -> Result<()> {
        self.settlements
            .update_one(
                doc! { "id": id },
                doc! { "$set": { "is_confirmed": true } },
                None,
            )
            .await?;
        Ok(())
    }
}
