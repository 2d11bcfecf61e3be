use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::schemas::{Expense, Group, SettlementRecord};

/// Turns a group's ledger and the settlements already recorded for it into
/// the records to append. Stores may call it more than once when they retry.
pub type PlanFn<'a> =
    &'a (dyn Fn(&[Expense], &[SettlementRecord]) -> Vec<SettlementRecord> + Send + Sync);

/// Where expenses are read from and settlement records written to.
///
/// Group, membership and expense management live with whoever owns the
/// store; the settlement service only reads ledgers and appends records.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// The expenses of a group, or `None` when the group does not exist.
    async fn group_expenses(&self, group_id: &str) -> Result<Option<Vec<Expense>>>;

    /// Reads the ledger and recorded settlements of a group, runs `plan` over
    /// them and appends what it returns, as one unit. No ledger change or
    /// other recording for the group lands between the read and the append.
    ///
    /// Returns `None` without calling `plan` when the group does not exist.
    async fn record_settlements(
        &self,
        group_id: &str,
        plan: PlanFn<'_>,
    ) -> Result<Option<Vec<SettlementRecord>>>;

    /// Records of a group, oldest first.
    async fn group_settlements(&self, group_id: &str) -> Result<Vec<SettlementRecord>>;

    async fn find_settlement(&self, id: &str) -> Result<Option<SettlementRecord>>;

    async fn confirm_settlement(&self, id: &str) -> Result<()>;
}

/// Process-local store. Starts from the groups it is given and loses every
/// record on exit.
#[derive(Default)]
pub struct MemoryStore {
    // Lock order: `groups` before `settlements`.
    groups: RwLock<HashMap<String, Group>>,
    settlements: RwLock<Vec<SettlementRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(groups: impl IntoIterator<Item = Group>) -> Self {
        let groups = groups.into_iter().map(|g| (g.id.clone(), g)).collect();
        Self {
            groups: RwLock::new(groups),
            settlements: RwLock::default(),
        }
    }

    /// Reads a JSON array of groups, expenses embedded.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let groups: Vec<Group> = serde_json::from_str(&raw)?;
        Ok(Self::with_groups(groups))
    }

    /// Adds a group or replaces its whole ledger.
    pub async fn put_group(&self, group: Group) {
        self.groups.write().await.insert(group.id.clone(), group);
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn group_expenses(&self, group_id: &str) -> Result<Option<Vec<Expense>>> {
        Ok(self
            .groups
            .read()
            .await
            .get(group_id)
            .map(|g| g.expenses.clone()))
    }

    async fn record_settlements(
        &self,
        group_id: &str,
        plan: PlanFn<'_>,
    ) -> Result<Option<Vec<SettlementRecord>>> {
        // The read guard keeps `put_group` out, the write guard keeps other
        // recordings out, until the new records are in.
        let groups = self.groups.read().await;
        let Some(group) = groups.get(group_id) else {
            return Ok(None);
        };
        let mut settlements = self.settlements.write().await;

        let recorded: Vec<SettlementRecord> = settlements
            .iter()
            .filter(|r| r.group_id == group_id)
            .cloned()
            .collect();
        let records = plan(&group.expenses, &recorded);
        settlements.extend_from_slice(&records);
        Ok(Some(records))
    }

    async fn group_settlements(&self, group_id: &str) -> Result<Vec<SettlementRecord>> {
        Ok(self
            .settlements
            .read()
            .await
            .iter()
            .filter(|r| r.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn find_settlement(&self, id: &str) -> Result<Option<SettlementRecord>> {
        Ok(self
            .settlements
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn confirm_settlement(&self, id: &str) -> Result<()> {
        if let Some(record) = self
            .settlements
            .write()
            .await
            .iter_mut()
            .find(|r| r.id == id)
        {
            record.is_confirmed = true;
        }
        Ok(())
    }
}
