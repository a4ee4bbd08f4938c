use std::collections::{BTreeSet, HashMap};

use rusqlite::{Connection, OptionalExtension};

use crate::error::{ImportError, Result};

/// Cost-item name to target id. Names match exactly, case included.
#[derive(Debug, Default, Clone)]
pub struct CostItemDictionaryMap {
    by_name: HashMap<String, i64>,
    created: usize,
}

impl CostItemDictionaryMap {
    /// Seeds the map from rows already in `cost_items`.
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare("SELECT id, name FROM cost_items ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut by_name = HashMap::with_capacity(rows.len());
        for (id, name) in rows {
            by_name.entry(name).or_insert(id);
        }
        Ok(Self { by_name, created: 0 })
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.by_name.get(name).copied()
    }

    /// Returns the id for `name`, inserting a new dictionary row if the name
    /// is not known yet. The insert is committed before this returns.
    pub fn find_or_create(&mut self, conn: &Connection, name: &str) -> Result<i64> {
        if let Some(id) = self.get(name) {
            return Ok(id);
        }
        let id = insert_cost_item(conn, name).map_err(|source| ImportError::DictionaryWrite {
            name: name.to_string(),
            source,
        })?;
        tracing::debug!(name, id, "created cost item");
        self.by_name.insert(name.to_string(), id);
        self.created += 1;
        Ok(id)
    }

    /// Resolves every distinct non-blank name. Any write failure aborts.
    pub fn resolve_all<'n, I>(&mut self, conn: &Connection, names: I) -> Result<HashMap<String, i64>>
    where
        I: IntoIterator<Item = &'n str>,
    {
        // Sorted so new rows get ids in a stable order across runs.
        let distinct: BTreeSet<&str> = names
            .into_iter()
            .filter(|n| !n.trim().is_empty())
            .collect();
        let mut out = HashMap::with_capacity(distinct.len());
        for name in distinct {
            let id = self.find_or_create(conn, name)?;
            out.insert(name.to_string(), id);
        }
        Ok(out)
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

fn insert_cost_item(conn: &Connection, name: &str) -> rusqlite::Result<i64> {
    let tx = conn.unchecked_transaction()?;
    // Another writer may have added the name since the map was seeded.
    let existing: Option<i64> = tx
        .query_row("SELECT id FROM cost_items WHERE name = ?", [name], |r| r.get(0))
        .optional()?;
    let id = match existing {
        Some(id) => id,
        None => {
            tx.execute("INSERT INTO cost_items(name) VALUES(?)", [name])?;
            tx.last_insert_rowid()
        }
    };
    tx.commit()?;
    Ok(id)
}
