use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension};

use crate::error::{ImportError, Result};

/// Child to parent links of the works nomenclature tree.
#[derive(Debug, Default, Clone)]
pub struct ParentGraph {
    parent_of: HashMap<i64, i64>,
}

impl ParentGraph {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (i64, Option<i64>)>,
    {
        let parent_of = pairs
            .into_iter()
            .filter_map(|(child, parent)| parent.map(|p| (child, p)))
            .collect();
        Self { parent_of }
    }

    pub fn load_works(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare("SELECT id, parent_id FROM works")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self::from_pairs(pairs))
    }

    pub fn parent(&self, child: i64) -> Option<i64> {
        self.parent_of.get(&child).copied()
    }

    /// False if `parent` is `child` itself or one of its descendants.
    pub fn can_set_parent(&self, child: i64, parent: i64) -> bool {
        let mut seen = HashSet::new();
        let mut cur = Some(parent);
        while let Some(node) = cur {
            if node == child {
                return false;
            }
            // Existing cycles elsewhere in the data must not hang the walk.
            if !seen.insert(node) {
                return true;
            }
            cur = self.parent(node);
        }
        true
    }

    /// Records `parent` for `child` if that keeps the graph acyclic.
    pub fn set_parent(&mut self, child: i64, parent: Option<i64>) -> Result<()> {
        match parent {
            Some(p) if !self.can_set_parent(child, p) => Err(ImportError::CircularReference {
                child_id: child,
                parent_id: p,
            }),
            Some(p) => {
                self.parent_of.insert(child, p);
                Ok(())
            }
            None => {
                self.parent_of.remove(&child);
                Ok(())
            }
        }
    }
}

/// Reparents a work in the target table, rejecting changes that would make
/// the work its own ancestor.
pub fn set_work_parent(conn: &Connection, work_id: i64, parent_id: Option<i64>) -> Result<()> {
    let mut graph = ParentGraph::load_works(conn)?;
    graph.set_parent(work_id, parent_id)?;
    if let Some(p) = parent_id {
        let exists: Option<i64> = conn
            .query_row("SELECT id FROM works WHERE id = ?", [p], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(ImportError::WorkNotFound(p));
        }
    }
    let changed = conn.execute(
        "UPDATE works SET parent_id = ? WHERE id = ?",
        (parent_id, work_id),
    )?;
    if changed == 0 {
        return Err(ImportError::WorkNotFound(work_id));
    }
    Ok(())
}
