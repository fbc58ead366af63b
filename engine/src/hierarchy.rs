//! FILENAME: engine/src/hierarchy.rs
//! PURPOSE: Parent/child links over one dimension's positions.
//! CONTEXT: A hierarchy is the basis for roll-up. The link graph is kept a
//! forest by construction: `set` rejects any link that would close a cycle,
//! so the ancestor/descendant closures of the selector functions always
//! terminate. Link data is shared between clones the same way position data
//! is, so worker copies observe the persisted structure.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::dimension::{Dimension, PositionData};
use crate::error::EngineError;
use crate::store::{LinkRecord, Store};

/// Parent/child relation over one dimension's positions.
#[derive(Clone)]
pub struct Hierarchy {
    code: String,
    dimension: String,
    /// child code -> parent code
    links: Arc<RwLock<HashMap<String, String>>>,
    /// position code -> traversal index, written by check_hier
    order_index: Arc<RwLock<HashMap<String, u64>>>,
    positions: Arc<RwLock<PositionData>>,
    store: Arc<dyn Store>,
}

impl fmt::Debug for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hierarchy")
            .field("dimension", &self.dimension)
            .field("code", &self.code)
            .finish()
    }
}

impl Hierarchy {
    pub(crate) fn new(dimension: &Dimension, code: &str, store: Arc<dyn Store>) -> Self {
        Hierarchy {
            code: code.to_uppercase(),
            dimension: dimension.code().to_string(),
            links: Arc::new(RwLock::new(HashMap::new())),
            order_index: Arc::new(RwLock::new(HashMap::new())),
            positions: dimension.position_data(),
            store,
        }
    }

    /// Rebuilds a hierarchy from persisted link and index records.
    pub(crate) fn from_records(
        dimension: &Dimension,
        code: &str,
        links: Vec<LinkRecord>,
        indexes: Vec<(String, u64)>,
        store: Arc<dyn Store>,
    ) -> Self {
        let hier = Hierarchy::new(dimension, code, store);
        {
            let mut map = hier.links.write().expect("link lock poisoned");
            for link in links {
                map.insert(link.child, link.parent);
            }
        }
        {
            let mut map = hier.order_index.write().expect("index lock poisoned");
            for (position, index) in indexes {
                map.insert(position, index);
            }
        }
        hier
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn dimension(&self) -> &str {
        &self.dimension
    }

    fn has_position(&self, code: &str) -> bool {
        self.positions
            .read()
            .expect("position lock poisoned")
            .by_code
            .contains_key(code)
    }

    /// Sets the parent of a position. Both codes must belong to the owning
    /// dimension, and the resulting graph must stay acyclic.
    pub fn set(&self, child: &str, parent: &str) -> Result<(), EngineError> {
        for code in [child, parent] {
            if !self.has_position(code) {
                return Err(EngineError::PositionNotFound {
                    dimension: self.dimension.clone(),
                    code: code.to_string(),
                });
            }
        }
        {
            let mut links = self.links.write().expect("link lock poisoned");
            // Walk up from the new parent; reaching the child means the new
            // link would close a cycle. A visited set bounds the walk even
            // against corrupt link data.
            let mut cursor = parent.to_string();
            let mut visited: HashSet<String> = HashSet::new();
            loop {
                if cursor == child {
                    return Err(EngineError::HierarchyCycle {
                        dimension: self.dimension.clone(),
                        hierarchy: self.code.clone(),
                        code: child.to_string(),
                    });
                }
                if !visited.insert(cursor.clone()) {
                    break;
                }
                match links.get(&cursor) {
                    Some(next) => cursor = next.clone(),
                    None => break,
                }
            }
            links.insert(child.to_string(), parent.to_string());
        }
        self.store
            .set_link(&self.dimension, &self.code, child, parent)?;
        Ok(())
    }

    /// Unsets the parent of a position.
    pub fn unset(&self, child: &str) -> Result<(), EngineError> {
        {
            let mut links = self.links.write().expect("link lock poisoned");
            if links.remove(child).is_none() {
                return Err(EngineError::LinkNotFound {
                    dimension: self.dimension.clone(),
                    hierarchy: self.code.clone(),
                    code: child.to_string(),
                });
            }
        }
        self.store.remove_link(&self.dimension, &self.code, child)?;
        Ok(())
    }

    /// The parent of a position, if it has one.
    pub fn parent(&self, child: &str) -> Option<String> {
        self.links
            .read()
            .expect("link lock poisoned")
            .get(child)
            .cloned()
    }

    /// The direct children of a position, sorted for determinism.
    pub fn children_of(&self, parent: &str) -> Vec<String> {
        let links = self.links.read().expect("link lock poisoned");
        let mut out: Vec<String> = links
            .iter()
            .filter(|(_, p)| p.as_str() == parent)
            .map(|(c, _)| c.clone())
            .collect();
        out.sort();
        out
    }

    /// Children that are never parents: the bottom level of the hierarchy.
    pub fn leaves(&self) -> Vec<String> {
        let links = self.links.read().expect("link lock poisoned");
        let parents: HashSet<&String> = links.values().collect();
        let mut out: Vec<String> = links
            .keys()
            .filter(|child| !parents.contains(*child))
            .cloned()
            .collect();
        out.sort();
        out
    }

    /// Parents that are never children: the top level of the hierarchy.
    pub fn roots(&self) -> Vec<String> {
        let links = self.links.read().expect("link lock poisoned");
        let children: HashSet<&String> = links.keys().collect();
        let mut out: Vec<String> = links
            .values()
            .filter(|parent| !children.contains(*parent))
            .cloned()
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Every code that appears in the hierarchy, as child or parent.
    pub fn member_codes(&self) -> Vec<String> {
        let links = self.links.read().expect("link lock poisoned");
        let mut set: HashSet<String> = HashSet::new();
        for (child, parent) in links.iter() {
            set.insert(child.clone());
            set.insert(parent.clone());
        }
        let mut out: Vec<String> = set.into_iter().collect();
        out.sort();
        out
    }

    /// Codes that appear as a parent of at least one link.
    pub fn parent_codes(&self) -> HashSet<String> {
        self.links
            .read()
            .expect("link lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// A snapshot of the link map.
    pub fn links_map(&self) -> HashMap<String, String> {
        self.links.read().expect("link lock poisoned").clone()
    }

    pub fn link_count(&self) -> usize {
        self.links.read().expect("link lock poisoned").len()
    }

    /// The traversal index of a position, if check_hier has run.
    pub fn order_index(&self, code: &str) -> Option<u64> {
        self.order_index
            .read()
            .expect("index lock poisoned")
            .get(code)
            .copied()
    }

    /// Records a traversal index for a position, in memory and in the store.
    /// Called by check_hier while it walks the hierarchy.
    pub fn record_order_index(&self, code: &str, index: u64) -> Result<(), EngineError> {
        self.order_index
            .write()
            .expect("index lock poisoned")
            .insert(code.to_string(), index);
        self.store
            .set_position_index(&self.dimension, &self.code, code, index)?;
        Ok(())
    }
}
