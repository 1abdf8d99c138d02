//! In-memory inventory store.
//!
//! Intended for tests/dev. Committed rows live behind one `RwLock`; each item
//! additionally has an async row lock that a transaction holds from first
//! touch until commit or drop, which serializes writers per item while
//! leaving other items free. Transactions stage full copies of the rows they
//! touch and publish them in one step on commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

use pantry_core::{ItemId, ItemTypeId, SubstitutionId, UnitId};
use pantry_inventory::unit::{sort_for_retirement, take_oldest};
use pantry_inventory::{
    CounterDelta, ExpirationUnit, Item, ItemType, ItemView, ListQuery, NewItem, NewUnit, Substitution,
};

use super::r#trait::{InventoryStore, ItemViewStream, StoreError, StoreTx};

#[derive(Debug, Default)]
struct Tables {
    items: BTreeMap<ItemId, Item>,
    names: HashMap<String, ItemId>,
    units: HashMap<ItemId, Vec<ExpirationUnit>>,
    item_types: BTreeMap<ItemTypeId, ItemType>,
    substitutions: BTreeMap<SubstitutionId, Substitution>,
}

#[derive(Debug, Default)]
struct Sequences {
    item: AtomicI64,
    unit: AtomicI64,
    item_type: AtomicI64,
    substitution: AtomicI64,
}

fn next_value(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::Relaxed) + 1
}

/// In-memory transactional inventory store.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    tables: RwLock<Tables>,
    row_locks: StdMutex<HashMap<ItemId, Arc<Mutex<()>>>>,
    // Serializes writers that create named rows (items and lookups).
    catalog_lock: Mutex<()>,
    sequences: Sequences,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::database("read", "lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::database("write", "lock poisoned"))
    }

    fn row_lock(&self, item_id: ItemId) -> Result<Arc<Mutex<()>>, StoreError> {
        let mut locks = self
            .row_locks
            .lock()
            .map_err(|_| StoreError::database("row_lock", "lock poisoned"))?;
        Ok(locks.entry(item_id).or_default().clone())
    }

    fn collect_views(&self, query: &ListQuery) -> Result<Vec<ItemView>, StoreError> {
        let tables = self.read()?;
        let max_rows = query.max_rows().unwrap_or(usize::MAX);

        let views = tables
            .items
            .values()
            .filter_map(|item| {
                let type_name = item
                    .type_id
                    .and_then(|id| tables.item_types.get(&id))
                    .map(|t| t.name.as_str());
                if !query.admits(item, type_name) {
                    return None;
                }
                let substitution_name = item
                    .substitution_id
                    .and_then(|id| tables.substitutions.get(&id))
                    .map(|s| s.name.as_str());
                Some(ItemView::from_item(item, type_name, substitution_name))
            })
            .take(max_rows)
            .collect();

        Ok(views)
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        Ok(Box::new(InMemoryTx {
            store: self,
            row_guards: HashMap::new(),
            catalog_guard: None,
            staged: BTreeMap::new(),
            new_item_types: Vec::new(),
            new_substitutions: Vec::new(),
        }))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Item>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .names
            .get(name)
            .and_then(|id| tables.items.get(id))
            .cloned())
    }

    async fn units(&self, item_id: ItemId) -> Result<Vec<ExpirationUnit>, StoreError> {
        let tables = self.read()?;
        let mut units = tables.units.get(&item_id).cloned().unwrap_or_default();
        sort_for_retirement(&mut units);
        Ok(units)
    }

    fn list_items(&self, query: ListQuery) -> ItemViewStream<'_> {
        match self.collect_views(&query) {
            Ok(views) => Box::pin(tokio_stream::iter(views.into_iter().map(Ok))),
            Err(e) => Box::pin(tokio_stream::once(Err(e))),
        }
    }

    async fn item_types(&self) -> Result<Vec<ItemType>, StoreError> {
        let mut types: Vec<_> = self.read()?.item_types.values().cloned().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    async fn substitutions(&self) -> Result<Vec<Substitution>, StoreError> {
        let mut subs: Vec<_> = self.read()?.substitutions.values().cloned().collect();
        subs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(subs)
    }
}

#[derive(Debug)]
struct StagedItem {
    item: Item,
    units: Vec<ExpirationUnit>,
    created: bool,
}

/// Write transaction over [`InMemoryInventoryStore`].
pub struct InMemoryTx<'a> {
    store: &'a InMemoryInventoryStore,
    row_guards: HashMap<ItemId, OwnedMutexGuard<()>>,
    catalog_guard: Option<MutexGuard<'a, ()>>,
    staged: BTreeMap<ItemId, StagedItem>,
    new_item_types: Vec<ItemType>,
    new_substitutions: Vec<Substitution>,
}

impl<'a> InMemoryTx<'a> {
    async fn lock_row(&mut self, item_id: ItemId) -> Result<(), StoreError> {
        if self.row_guards.contains_key(&item_id) {
            return Ok(());
        }
        let lock = self.store.row_lock(item_id)?;
        let guard = lock.lock_owned().await;
        self.row_guards.insert(item_id, guard);
        Ok(())
    }

    async fn lock_catalog(&mut self) {
        if self.catalog_guard.is_none() {
            self.catalog_guard = Some(self.store.catalog_lock.lock().await);
        }
    }

    /// Lock the item row and stage a private copy of it and its units.
    async fn stage(&mut self, item_id: ItemId) -> Result<&mut StagedItem, StoreError> {
        if !self.staged.contains_key(&item_id) {
            self.lock_row(item_id).await?;
            let staged = {
                let tables = self.store.read()?;
                let item = tables
                    .items
                    .get(&item_id)
                    .cloned()
                    .ok_or(StoreError::ItemNotFound(item_id))?;
                let units = tables.units.get(&item_id).cloned().unwrap_or_default();
                StagedItem {
                    item,
                    units,
                    created: false,
                }
            };
            self.staged.insert(item_id, staged);
        }
        self.staged
            .get_mut(&item_id)
            .ok_or(StoreError::ItemNotFound(item_id))
    }

    fn name_taken(&self, tables: &Tables, name: &str) -> bool {
        tables.names.contains_key(name)
            || self
                .staged
                .values()
                .any(|s| s.created && s.item.name == name)
    }

    fn check_references(&self, tables: &Tables, new: &NewItem) -> Result<(), StoreError> {
        if let Some(id) = new.type_id {
            let known = tables.item_types.contains_key(&id)
                || self.new_item_types.iter().any(|t| t.id == id);
            if !known {
                return Err(StoreError::InvalidReference(format!("item type {id}")));
            }
        }
        if let Some(id) = new.substitution_id {
            let known = tables.substitutions.contains_key(&id)
                || self.new_substitutions.iter().any(|s| s.id == id);
            if !known {
                return Err(StoreError::InvalidReference(format!("substitution {id}")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<'a> StoreTx for InMemoryTx<'a> {
    async fn lock_item_by_name(&mut self, name: &str) -> Result<Option<Item>, StoreError> {
        if let Some(staged) = self.staged.values().find(|s| s.item.name == name) {
            return Ok(Some(staged.item.clone()));
        }
        let item_id = match self.store.read()?.names.get(name) {
            Some(id) => *id,
            None => return Ok(None),
        };
        let staged = self.stage(item_id).await?;
        Ok(Some(staged.item.clone()))
    }

    async fn create_item(&mut self, new: &NewItem, at: DateTime<Utc>) -> Result<Item, StoreError> {
        self.lock_catalog().await;
        {
            let tables = self.store.read()?;
            if self.name_taken(&tables, &new.name) {
                return Err(StoreError::DuplicateName(new.name.clone()));
            }
            self.check_references(&tables, new)?;
        }

        let item_id = ItemId::new(next_value(&self.store.sequences.item));
        let item = Item::from_new(item_id, new, at);
        self.staged.insert(
            item_id,
            StagedItem {
                item: item.clone(),
                units: Vec::new(),
                created: true,
            },
        );
        Ok(item)
    }

    async fn add_units(&mut self, unit: NewUnit, count: u32) -> Result<Vec<ExpirationUnit>, StoreError> {
        let store = self.store;
        let unit_seq = &store.sequences.unit;
        let staged = self.stage(unit.item_id).await?;

        let added: Vec<_> = (0..count)
            .map(|_| unit.with_id(UnitId::new(next_value(unit_seq))))
            .collect();
        staged.units.extend(added.iter().cloned());
        Ok(added)
    }

    async fn remove_oldest(&mut self, item_id: ItemId, count: u32) -> Result<Vec<ExpirationUnit>, StoreError> {
        let staged = self.stage(item_id).await?;
        let removed = take_oldest(&mut staged.units, count as usize);
        if removed.len() < count as usize {
            return Err(StoreError::InsufficientUnits {
                requested: count,
                removed: removed.len() as u32,
            });
        }
        Ok(removed)
    }

    async fn count_active(&mut self, item_id: ItemId) -> Result<i64, StoreError> {
        let staged = self.stage(item_id).await?;
        Ok(staged.units.len() as i64)
    }

    async fn apply_delta(
        &mut self,
        item_id: ItemId,
        delta: CounterDelta,
        at: DateTime<Utc>,
    ) -> Result<Item, StoreError> {
        let staged = self.stage(item_id).await?;
        staged
            .item
            .apply_delta(delta, at)
            .map_err(|e| StoreError::database("apply_delta", e.to_string()))?;
        Ok(staged.item.clone())
    }

    async fn create_item_type(&mut self, name: &str) -> Result<ItemType, StoreError> {
        self.lock_catalog().await;
        {
            let tables = self.store.read()?;
            let taken = tables.item_types.values().any(|t| t.name == name)
                || self.new_item_types.iter().any(|t| t.name == name);
            if taken {
                return Err(StoreError::DuplicateName(name.to_string()));
            }
        }
        let item_type = ItemType {
            id: ItemTypeId::new(next_value(&self.store.sequences.item_type)),
            name: name.to_string(),
        };
        self.new_item_types.push(item_type.clone());
        Ok(item_type)
    }

    async fn create_substitution(&mut self, name: &str) -> Result<Substitution, StoreError> {
        self.lock_catalog().await;
        {
            let tables = self.store.read()?;
            let taken = tables.substitutions.values().any(|s| s.name == name)
                || self.new_substitutions.iter().any(|s| s.name == name);
            if taken {
                return Err(StoreError::DuplicateName(name.to_string()));
            }
        }
        let substitution = Substitution {
            id: SubstitutionId::new(next_value(&self.store.sequences.substitution)),
            name: name.to_string(),
        };
        self.new_substitutions.push(substitution.clone());
        Ok(substitution)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        {
            let mut tables = this.store.write()?;
            for item_type in this.new_item_types {
                tables.item_types.insert(item_type.id, item_type);
            }
            for substitution in this.new_substitutions {
                tables.substitutions.insert(substitution.id, substitution);
            }
            for (item_id, staged) in this.staged {
                if staged.created {
                    tables.names.insert(staged.item.name.clone(), item_id);
                }
                tables.items.insert(item_id, staged.item);
                tables.units.insert(item_id, staged.units);
            }
        }
        // Row and catalog locks are released only after the new rows are visible.
        drop(this.row_guards);
        drop(this.catalog_guard);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
