#![forbid(unsafe_code)]

use agg_core::ResolvedPlanNode;
use agg_storage::{ResolvedPlanSource, StoreError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

const MAX_PLAN_NODES: usize = 1_000_000;

/// Materialised static plan tree of one execution.
#[derive(Clone, Debug)]
pub struct ResolvedPlanTree {
    root_id: String,
    nodes: HashMap<String, ResolvedPlanNode>,
    children: HashMap<String, Vec<String>>,
}

impl ResolvedPlanTree {
    /// `None` when the root is not stored (yet).
    pub fn load(source: &dyn ResolvedPlanSource, root_id: &str) -> Result<Option<Self>, StoreError> {
        let Some(root) = source.resolved_plan_node(root_id)? else {
            return Ok(None);
        };

        let root_id = root.id.clone();
        let mut nodes = HashMap::new();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut seen = HashSet::from([root_id.clone()]);
        let mut pending = vec![root_id.clone()];
        nodes.insert(root_id.clone(), root);

        while let Some(parent_id) = pending.pop() {
            let mut child_ids = Vec::new();
            source.for_each_child(&parent_id, &mut |child| {
                if seen.insert(child.id.clone()) {
                    child_ids.push(child.id.clone());
                    nodes.insert(child.id.clone(), child);
                }
            })?;
            if nodes.len() > MAX_PLAN_NODES {
                return Err(StoreError::InvalidInput("resolved plan is too large"));
            }
            pending.extend(child_ids.iter().cloned());
            children.insert(parent_id, child_ids);
        }

        Ok(Some(Self {
            root_id,
            nodes,
            children,
        }))
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn root(&self) -> &ResolvedPlanNode {
        &self.nodes[&self.root_id]
    }

    pub fn node(&self, id: &str) -> Option<&ResolvedPlanNode> {
        self.nodes.get(id)
    }

    /// In source order.
    pub fn children(&self, id: &str) -> impl Iterator<Item = &ResolvedPlanNode> {
        self.children
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|child_id| self.nodes.get(child_id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Read-through cache of plan trees keyed by execution id. The plan of an execution is immutable
/// once resolved, so entries only go stale when the execution's root changes.
#[derive(Debug, Default)]
pub struct ResolvedPlanCache {
    trees: Mutex<HashMap<String, Arc<ResolvedPlanTree>>>,
}

impl ResolvedPlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(
        &self,
        execution_id: &str,
        root_id: &str,
        source: &dyn ResolvedPlanSource,
    ) -> Result<Option<Arc<ResolvedPlanTree>>, StoreError> {
        if let Some(tree) = self.lock().get(execution_id) {
            if tree.root_id() == root_id {
                return Ok(Some(Arc::clone(tree)));
            }
            tracing::warn!(
                execution_id,
                cached_root = tree.root_id(),
                root_id,
                "resolved plan root changed, reloading"
            );
        }

        let Some(tree) = ResolvedPlanTree::load(source, root_id)? else {
            return Ok(None);
        };
        let tree = Arc::new(tree);
        self.lock()
            .insert(execution_id.to_string(), Arc::clone(&tree));
        Ok(Some(tree))
    }

    pub fn invalidate(&self, execution_id: &str) -> bool {
        self.lock().remove(execution_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<ResolvedPlanTree>>> {
        match self.trees.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
