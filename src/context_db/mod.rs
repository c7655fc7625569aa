//! In-memory, multi-index table store (spec.md §4.1). Grounded in the shape
//! of `contextdb/db.go`'s `hashicorp/go-memdb` usage (truncated in the
//! retrieved source, so the indexer/range-scan/purge semantics below follow
//! spec.md's prose directly) and tested against the fixtures in
//! `contextdb/mockup.go` / `contextdb/db_test.go`.
//!
//! Unlike `go-memdb`, there is no separate txn/commit API here: each public
//! method is one atomic operation under a per-table `Mutex`, which gives the
//! same "readers see a consistent snapshot, one write transaction per
//! write" guarantee spec.md §4.1/§5 asks for without needing MVCC
//! machinery this engine doesn't otherwise require.

pub mod bus;
pub mod index;

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use index::{DbSchema, IndexSchema, TableSchema};

#[derive(Debug, Clone)]
pub struct Record {
    pub data: serde_json::Value,
    pub last_updated_millis: i64,
}

struct Table {
    schema: TableSchema,
    records: HashMap<Uuid, Record>,
    // index name -> composite key -> record ids sharing that key
    indexes: HashMap<String, BTreeMap<Vec<u8>, Vec<Uuid>>>,
}

impl Table {
    fn new(schema: TableSchema) -> Self {
        let indexes = schema
            .indexes
            .iter()
            .map(|idx| (idx.name.clone(), BTreeMap::new()))
            .collect();
        Table {
            schema,
            records: HashMap::new(),
            indexes,
        }
    }

    fn index_schema(&self, name: &str) -> EngineResult<&IndexSchema> {
        self.schema
            .indexes
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| EngineError::ContextDb(format!("no such index `{name}`")))
    }

    fn unindex(&mut self, id: Uuid, data: &serde_json::Value) {
        for idx_schema in self.schema.indexes.clone() {
            let keys = index::index_keys_for_record(&idx_schema, data);
            if let Some(map) = self.indexes.get_mut(&idx_schema.name) {
                for key in keys {
                    if let Some(ids) = map.get_mut(&key) {
                        ids.retain(|existing| *existing != id);
                        if ids.is_empty() {
                            map.remove(&key);
                        }
                    }
                }
            }
        }
    }

    fn reindex(&mut self, id: Uuid, data: &serde_json::Value) {
        for idx_schema in self.schema.indexes.clone() {
            let keys = index::index_keys_for_record(&idx_schema, data);
            let map = self.indexes.entry(idx_schema.name.clone()).or_default();
            for key in keys {
                map.entry(key).or_default().push(id);
            }
        }
    }

    fn insert_or_update(&mut self, data: serde_json::Value) -> EngineResult<()> {
        let primary = self
            .schema
            .primary()
            .ok_or_else(|| EngineError::ConfigInvalid(format!(
                "table `{}` has no primary `id` index",
                self.schema.name
            )))?
            .clone();

        let primary_keys = index::index_keys_for_record(&primary, &data);
        let Some(primary_key) = primary_keys.into_iter().next() else {
            // a required primary-key field resolved to nothing: skip this
            // record rather than fail the whole insert (§4.1 per-record
            // failure semantics)
            tracing::warn!(table = %self.schema.name, "skipping record with incomplete primary key");
            return Ok(());
        };

        let existing_id = self
            .indexes
            .get(&primary.name)
            .and_then(|m| m.get(&primary_key))
            .and_then(|ids| ids.first().copied());

        let id = if let Some(id) = existing_id {
            if let Some(old) = self.records.get(&id).cloned() {
                self.unindex(id, &old.data);
            }
            id
        } else {
            Uuid::new_v4()
        };

        let record = Record {
            data,
            last_updated_millis: Utc::now().timestamp_millis(),
        };
        self.reindex(id, &record.data);
        self.records.insert(id, record);
        Ok(())
    }

    fn get_first(&self, index_name: &str, values: &[String]) -> EngineResult<Option<Record>> {
        self.index_schema(index_name)?;
        let key = index::encode_query(values);
        let id = self
            .indexes
            .get(index_name)
            .and_then(|m| m.get(&key))
            .and_then(|ids| ids.first().copied());
        Ok(id.and_then(|id| self.records.get(&id).cloned()))
    }

    fn get_all(&self, index_name: &str, values: &[String]) -> EngineResult<Vec<Record>> {
        self.index_schema(index_name)?;
        let exact_key = index::encode_query(values);
        let map = match self.indexes.get(index_name) {
            Some(m) => m,
            None => return Ok(Vec::new()),
        };

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        // range scan: keys >= exact_key in lexicographic order, re-verify
        // exact match, dedup by primary/record id (spec.md §4.1, property 6)
        for (key, ids) in map.range(exact_key.clone()..) {
            if key != &exact_key {
                break;
            }
            for id in ids {
                if seen.insert(*id) {
                    if let Some(rec) = self.records.get(id) {
                        out.push(rec.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    fn delete(&mut self, id: Uuid) {
        if let Some(rec) = self.records.remove(&id) {
            self.unindex(id, &rec.data);
        }
    }

    /// Removes the record identified by `data`'s primary-index fields, if
    /// one exists (spec.md §4.1's `Delete(table, record)` — "removes by
    /// identity").
    fn delete_by_identity(&mut self, data: &serde_json::Value) -> EngineResult<()> {
        let primary = self
            .schema
            .primary()
            .ok_or_else(|| EngineError::ConfigInvalid(format!(
                "table `{}` has no primary `id` index",
                self.schema.name
            )))?
            .clone();

        let primary_keys = index::index_keys_for_record(&primary, data);
        let Some(primary_key) = primary_keys.into_iter().next() else {
            return Ok(());
        };

        let id = self
            .indexes
            .get(&primary.name)
            .and_then(|m| m.get(&primary_key))
            .and_then(|ids| ids.first().copied());

        if let Some(id) = id {
            self.delete(id);
        }
        Ok(())
    }

    fn purge_older_than(&mut self, age_minutes: i64) {
        let Some(primary) = self.schema.primary().cloned() else {
            return;
        };
        let cutoff = Utc::now().timestamp_millis() - age_minutes * 60_000;
        let ordered_ids: Vec<Uuid> = self
            .indexes
            .get(&primary.name)
            .map(|m| m.values().flatten().copied().collect())
            .unwrap_or_default();

        let mut to_delete = Vec::new();
        for id in ordered_ids {
            match self.records.get(&id) {
                Some(rec) if rec.last_updated_millis < cutoff => to_delete.push(id),
                // first record younger than cutoff: stop, per spec.md's
                // documented (and intentionally not-reopened) limitation
                // that primary-index order is assumed to track recency
                _ => break,
            }
        }
        for id in to_delete {
            self.delete(id);
        }
    }
}

pub struct ContextDb {
    tables: HashMap<String, Mutex<Table>>,
}

impl ContextDb {
    pub fn init(schema: DbSchema) -> EngineResult<Self> {
        let mut tables = HashMap::new();
        for table_schema in schema.tables {
            if table_schema.primary().is_none() {
                return Err(EngineError::ConfigInvalid(format!(
                    "table `{}` is missing a required unique primary index named `id`",
                    table_schema.name
                )));
            }
            tables.insert(
                table_schema.name.clone(),
                Mutex::new(Table::new(table_schema)),
            );
        }
        Ok(ContextDb { tables })
    }

    fn table(&self, name: &str) -> EngineResult<&Mutex<Table>> {
        self.tables
            .get(name)
            .ok_or_else(|| EngineError::ContextDb(format!("no such table `{name}`")))
    }

    pub fn insert_or_update(&self, table: &str, data: serde_json::Value) -> EngineResult<()> {
        self.table(table)?
            .lock()
            .expect("context db table mutex poisoned")
            .insert_or_update(data)
    }

    pub fn get_first(
        &self,
        table: &str,
        index: &str,
        values: &[String],
    ) -> EngineResult<Option<Record>> {
        self.table(table)?
            .lock()
            .expect("context db table mutex poisoned")
            .get_first(index, values)
    }

    pub fn get_all(&self, table: &str, index: &str, values: &[String]) -> EngineResult<Vec<Record>> {
        self.table(table)?
            .lock()
            .expect("context db table mutex poisoned")
            .get_all(index, values)
    }

    /// Removes the record matching `record`'s primary-index identity from
    /// `table`, if one exists (spec.md §4.1's `Delete(table, record)`).
    pub fn delete(&self, table: &str, record: &serde_json::Value) -> EngineResult<()> {
        self.table(table)?
            .lock()
            .expect("context db table mutex poisoned")
            .delete_by_identity(record)
    }

    pub fn purge_older_than(&self, table: &str, age_minutes: i64) -> EngineResult<()> {
        self.table(table)?
            .lock()
            .expect("context db table mutex poisoned")
            .purge_older_than(age_minutes);
        Ok(())
    }

    pub fn dump(&self, table: &str) -> EngineResult<Vec<serde_json::Value>> {
        Ok(self
            .table(table)?
            .lock()
            .expect("context db table mutex poisoned")
            .records
            .values()
            .map(|r| r.data.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use index::IndexSchema;
    use serde_json::json;

    fn appd_schema() -> DbSchema {
        DbSchema {
            tables: vec![TableSchema {
                name: "appd".into(),
                indexes: vec![
                    IndexSchema {
                        name: "id".into(),
                        unique: true,
                        multi_value: false,
                        fields: vec!["/application".into(), "/tier".into(), "/node".into()],
                    },
                    IndexSchema {
                        name: "ip".into(),
                        unique: false,
                        multi_value: true,
                        fields: vec!["/ipv4".into()],
                    },
                ],
            }],
        }
    }

    // Concrete Scenario A (spec.md §8): GetAll by a multi-value `ip` index
    // must return exactly the one record containing the queried address.
    #[test]
    fn scenario_a_multi_value_ip_lookup() {
        let db = ContextDb::init(appd_schema()).unwrap();
        let fixtures = [
            ("appA", "tier1", "node1", vec!["10.133.10.150", "10.134.10.150"]),
            ("appB", "tier1", "node2", vec!["10.133.10.151", "10.134.10.151"]),
            ("appC", "tier2", "node3", vec!["10.133.10.152", "10.134.10.152"]),
            ("appD", "tier2", "node4", vec!["10.133.10.153", "10.134.10.153"]),
            ("appE", "tier3", "node5", vec!["10.133.10.154", "10.134.10.154"]),
        ];
        for (app, tier, node, ips) in fixtures {
            db.insert_or_update(
                "appd",
                json!({"application": app, "tier": tier, "node": node, "ipv4": ips}),
            )
            .unwrap();
        }

        let got = db
            .get_all("appd", "ip", &["10.134.10.150".to_string()])
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data["application"], "appA");
    }

    #[test]
    fn insert_or_update_is_idempotent_upsert() {
        let db = ContextDb::init(appd_schema()).unwrap();
        db.insert_or_update(
            "appd",
            json!({"application": "appA", "tier": "t1", "node": "n1", "ipv4": ["1.1.1.1"]}),
        )
        .unwrap();
        db.insert_or_update(
            "appd",
            json!({"application": "appA", "tier": "t1", "node": "n1", "ipv4": ["2.2.2.2"]}),
        )
        .unwrap();

        let got = db
            .get_first(
                "appd",
                "id",
                &["appA".to_string(), "t1".to_string(), "n1".to_string()],
            )
            .unwrap()
            .unwrap();
        assert_eq!(got.data["ipv4"][0], "2.2.2.2");

        let via_old_ip = db.get_all("appd", "ip", &["1.1.1.1".to_string()]).unwrap();
        assert!(via_old_ip.is_empty());
    }

    #[test]
    fn get_first_not_found_is_none_not_error() {
        let db = ContextDb::init(appd_schema()).unwrap();
        let got = db
            .get_first("appd", "id", &["x".into(), "y".into(), "z".into()])
            .unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn delete_removes_record_by_identity() {
        let db = ContextDb::init(appd_schema()).unwrap();
        db.insert_or_update(
            "appd",
            json!({"application": "appA", "tier": "t1", "node": "n1", "ipv4": ["1.1.1.1"]}),
        )
        .unwrap();

        db.delete(
            "appd",
            &json!({"application": "appA", "tier": "t1", "node": "n1"}),
        )
        .unwrap();

        let got = db
            .get_first("appd", "id", &["appA".to_string(), "t1".to_string(), "n1".to_string()])
            .unwrap();
        assert!(got.is_none());
        assert!(db.get_all("appd", "ip", &["1.1.1.1".to_string()]).unwrap().is_empty());
    }
}
