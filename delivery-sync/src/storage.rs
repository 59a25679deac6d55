//! redb-based storage for the sync core
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | `order_id` | `Order` | Order records (never deleted) |
//! | `order_external_index` | `external_id` | `order_id` | Lookup by marketplace id |
//! | `active_orders` | `order_id` | `()` | Non-terminal order index |
//! | `disputes` | `dispute_id` | `Dispute` | Dispute records |
//! | `dispute_events` | `event_id` | `dispute_id` | Dedup key for dispute events |
//! | `settlements` | `event_id` | `Settlement` | Settlement records |
//!
//! Every conditional update runs inside a single write transaction; redb
//! serializes writers, so "set X only if current = Y" is atomic.

use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use shared::dispute::{Dispute, DisputeStatus, Settlement};
use shared::order::{Order, OrderStatus};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

const ORDER_EXTERNAL_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("order_external_index");

const ACTIVE_ORDERS_TABLE: TableDefinition<&str, ()> = TableDefinition::new("active_orders");

const DISPUTES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("disputes");

const DISPUTE_EVENTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("dispute_events");

const SETTLEMENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("settlements");

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// 条件更新结果
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalUpdate<T> {
    /// 当前状态匹配，已写入（返回更新后的记录）
    Applied(T),
    /// 当前状态不匹配，未写入（返回当前记录）
    Mismatch(T),
    NotFound,
}

/// 协商插入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeInsert {
    Inserted,
    /// 同一事件 ID 已处理过
    DuplicateEvent,
    /// 不同事件携带了已存在的协商 ID
    DuplicateDispute,
}

/// Sync storage backed by redb
#[derive(Clone)]
pub struct SyncStorage {
    db: Arc<Database>,
}

impl SyncStorage {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(ORDER_EXTERNAL_INDEX)?;
            let _ = write_txn.open_table(ACTIVE_ORDERS_TABLE)?;
            let _ = write_txn.open_table(DISPUTES_TABLE)?;
            let _ = write_txn.open_table(DISPUTE_EVENTS_TABLE)?;
            let _ = write_txn.open_table(SETTLEMENTS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    // ========== Orders ==========

    /// 按平台订单 ID 插入（已存在则不写入，返回 false）
    pub fn insert_order(&self, order: &Order) -> StorageResult<bool> {
        let txn = self.db.begin_write()?;
        {
            let mut index = txn.open_table(ORDER_EXTERNAL_INDEX)?;
            if index.get(order.external_id.as_str())?.is_some() {
                return Ok(false);
            }
            index.insert(order.external_id.as_str(), order.id.as_str())?;
        }
        Self::put_order(&txn, order)?;
        txn.commit()?;
        Ok(true)
    }

    pub fn get_order(&self, order_id: &str) -> StorageResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;

        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn find_by_external_id(&self, external_id: &str) -> StorageResult<Option<Order>> {
        let order_id = {
            let read_txn = self.db.begin_read()?;
            let index = read_txn.open_table(ORDER_EXTERNAL_INDEX)?;
            match index.get(external_id)? {
                Some(id) => id.value().to_string(),
                None => return Ok(None),
            }
        };
        self.get_order(&order_id)
    }

    /// 原子条件更新：仅当当前状态属于 `expected` 时写入 `next`
    ///
    /// `patch` 只在状态匹配时执行，用于同步修改骑手等附属字段。
    pub fn update_status_if(
        &self,
        order_id: &str,
        expected: &[OrderStatus],
        next: OrderStatus,
        now: i64,
        patch: impl FnOnce(&mut Order),
    ) -> StorageResult<ConditionalUpdate<Order>> {
        let txn = self.db.begin_write()?;
        let Some(mut order) = Self::read_order(&txn, order_id)? else {
            return Ok(ConditionalUpdate::NotFound);
        };
        if !expected.contains(&order.status) {
            return Ok(ConditionalUpdate::Mismatch(order));
        }

        order.status = next;
        order.updated_at = now;
        patch(&mut order);
        Self::put_order(&txn, &order)?;
        txn.commit()?;
        Ok(ConditionalUpdate::Applied(order))
    }

    /// 修改非状态字段（例如骑手黑名单）
    pub fn update_order(
        &self,
        order_id: &str,
        f: impl FnOnce(&mut Order),
    ) -> StorageResult<Option<Order>> {
        let txn = self.db.begin_write()?;
        let Some(mut order) = Self::read_order(&txn, order_id)? else {
            return Ok(None);
        };
        let status = order.status;
        f(&mut order);
        // 状态只能走 update_status_if
        order.status = status;
        Self::put_order(&txn, &order)?;
        txn.commit()?;
        Ok(Some(order))
    }

    /// 所有非终态订单
    pub fn active_orders(&self) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let active = read_txn.open_table(ACTIVE_ORDERS_TABLE)?;
        let orders = read_txn.open_table(ORDERS_TABLE)?;

        let mut result = Vec::new();
        for entry in active.iter()? {
            let (key, _value) = entry?;
            if let Some(value) = orders.get(key.value())? {
                result.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(result)
    }

    /// 处于 scheduled 且 `scheduled_at ∈ [from, until]` 的订单
    pub fn scheduled_orders_due(&self, from: i64, until: i64) -> StorageResult<Vec<Order>> {
        Ok(self
            .active_orders()?
            .into_iter()
            .filter(|o| o.status == OrderStatus::Scheduled)
            .filter(|o| o.scheduled_at.is_some_and(|at| at >= from && at <= until))
            .collect())
    }

    fn read_order(txn: &WriteTransaction, order_id: &str) -> StorageResult<Option<Order>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn put_order(txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let value = serde_json::to_vec(order)?;
        {
            let mut table = txn.open_table(ORDERS_TABLE)?;
            table.insert(order.id.as_str(), value.as_slice())?;
        }
        let mut active = txn.open_table(ACTIVE_ORDERS_TABLE)?;
        if order.status.is_terminal() {
            active.remove(order.id.as_str())?;
        } else {
            active.insert(order.id.as_str(), ())?;
        }
        Ok(())
    }

    // ========== Disputes ==========

    /// 按事件 ID + 协商 ID 去重插入
    pub fn insert_dispute_if_absent(&self, dispute: &Dispute) -> StorageResult<DisputeInsert> {
        let txn = self.db.begin_write()?;
        {
            let mut events = txn.open_table(DISPUTE_EVENTS_TABLE)?;
            if events.get(dispute.source_event_id.as_str())?.is_some() {
                return Ok(DisputeInsert::DuplicateEvent);
            }

            let mut disputes = txn.open_table(DISPUTES_TABLE)?;
            if disputes.get(dispute.dispute_id.as_str())?.is_some() {
                // 记住这个事件 ID，重投时走更便宜的分支
                events.insert(
                    dispute.source_event_id.as_str(),
                    dispute.dispute_id.as_str(),
                )?;
                drop(disputes);
                drop(events);
                txn.commit()?;
                return Ok(DisputeInsert::DuplicateDispute);
            }

            let value = serde_json::to_vec(dispute)?;
            disputes.insert(dispute.dispute_id.as_str(), value.as_slice())?;
            events.insert(
                dispute.source_event_id.as_str(),
                dispute.dispute_id.as_str(),
            )?;
        }
        txn.commit()?;
        Ok(DisputeInsert::Inserted)
    }

    pub fn get_dispute(&self, dispute_id: &str) -> StorageResult<Option<Dispute>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DISPUTES_TABLE)?;
        match table.get(dispute_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// 原子条件更新协商状态
    pub fn update_dispute_if(
        &self,
        dispute_id: &str,
        expected: &[DisputeStatus],
        next: DisputeStatus,
        now: i64,
        note: Option<String>,
    ) -> StorageResult<ConditionalUpdate<Dispute>> {
        let txn = self.db.begin_write()?;
        let updated = {
            let mut table = txn.open_table(DISPUTES_TABLE)?;
            let current: Option<Dispute> = match table.get(dispute_id)? {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            };
            let Some(mut dispute) = current else {
                return Ok(ConditionalUpdate::NotFound);
            };
            if !expected.contains(&dispute.status) {
                return Ok(ConditionalUpdate::Mismatch(dispute));
            }

            dispute.status = next;
            dispute.updated_at = now;
            if note.is_some() {
                dispute.response_note = note;
            }
            let value = serde_json::to_vec(&dispute)?;
            table.insert(dispute_id, value.as_slice())?;
            dispute
        };
        txn.commit()?;
        Ok(ConditionalUpdate::Applied(updated))
    }

    pub fn disputes_with_status(&self, status: DisputeStatus) -> StorageResult<Vec<Dispute>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DISPUTES_TABLE)?;

        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_key, value) = entry?;
            let dispute: Dispute = serde_json::from_slice(value.value())?;
            if dispute.status == status {
                result.push(dispute);
            }
        }
        Ok(result)
    }

    // ========== Settlements ==========

    /// 按事件 ID 去重插入（已存在返回 false）
    pub fn insert_settlement_if_absent(&self, settlement: &Settlement) -> StorageResult<bool> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTLEMENTS_TABLE)?;
            if table.get(settlement.event_id.as_str())?.is_some() {
                return Ok(false);
            }
            let value = serde_json::to_vec(settlement)?;
            table.insert(settlement.event_id.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(true)
    }

    pub fn get_settlement(&self, event_id: &str) -> StorageResult<Option<Settlement>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SETTLEMENTS_TABLE)?;
        match table.get(event_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// 回链到已知协商（只写一次）
    pub fn link_settlement(&self, event_id: &str, dispute_id: &str) -> StorageResult<bool> {
        let txn = self.db.begin_write()?;
        let linked = {
            let mut table = txn.open_table(SETTLEMENTS_TABLE)?;
            let current: Option<Settlement> = match table.get(event_id)? {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            };
            match current {
                Some(mut settlement) if settlement.linked_dispute_id.is_none() => {
                    settlement.linked_dispute_id = Some(dispute_id.to_string());
                    let value = serde_json::to_vec(&settlement)?;
                    table.insert(event_id, value.as_slice())?;
                    true
                }
                _ => false,
            }
        };
        txn.commit()?;
        Ok(linked)
    }

    /// 引用指定协商、尚未回链的结算
    pub fn unlinked_settlements_for(&self, dispute_id: &str) -> StorageResult<Vec<Settlement>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SETTLEMENTS_TABLE)?;

        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_key, value) = entry?;
            let settlement: Settlement = serde_json::from_slice(value.value())?;
            if settlement.linked_dispute_id.is_none()
                && settlement.dispute_ref.as_deref() == Some(dispute_id)
            {
                result.push(settlement);
            }
        }
        Ok(result)
    }
}
