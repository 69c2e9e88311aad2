//! Thread registry: opaque UUIDs over private call chains.
//!
//! Handlers only ever see the UUID of their own hop; each extension
//! allocates a fresh UUID, so a handler cannot correlate the identifier it
//! received with the one delivered to a sub-call. The registry is written
//! and read exclusively by the pump.
//!
//! Entries form a tree: extending a chain creates a child entry whose
//! cancellation token is a child of its parent's, so pruning a subtree
//! cancels every in-flight dispatch beneath it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use polyp_core::budget::TokenBudget;

/// Pump-facing view of one chain entry.
#[derive(Debug, Clone)]
pub struct ChainInfo {
    pub chain: Vec<String>,
    pub root: Uuid,
}

/// Where a response should go after pruning the responder.
#[derive(Debug, Clone)]
pub struct ResponseRoute {
    /// Thread UUID the response travels on.
    pub thread: Uuid,
    /// The new tail: the listener (or origin) that made the call.
    pub caller: String,
    /// True when the caller is the chain origin rather than an executor.
    pub caller_is_origin: bool,
}

struct ChainEntry {
    chain: Vec<String>,
    parent: Option<Uuid>,
    root: Uuid,
    children: Vec<Uuid>,
    cancel: CancellationToken,
    budget: Arc<TokenBudget>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Uuid, ChainEntry>,
    issued: HashSet<Uuid>,
}

impl Inner {
    fn fresh_uuid(&mut self) -> Uuid {
        loop {
            let id = Uuid::new_v4();
            if self.issued.insert(id) {
                return id;
            }
        }
    }

    fn remove_subtree(&mut self, id: Uuid) {
        if let Some(entry) = self.entries.remove(&id) {
            entry.cancel.cancel();
            for child in entry.children {
                self.remove_subtree(child);
            }
        }
    }

    fn remove_descendants(&mut self, id: Uuid) {
        let children = match self.entries.get_mut(&id) {
            Some(entry) => std::mem::take(&mut entry.children),
            None => return,
        };
        for child in children {
            self.remove_subtree(child);
        }
    }
}

/// The thread registry.
pub struct ThreadRegistry {
    inner: Mutex<Inner>,
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Start a new chain `[sender, target]` and return its UUID.
    pub fn start_chain(&self, sender: &str, target: &str, budget: Arc<TokenBudget>) -> Uuid {
        let mut inner = self.inner.lock().expect("thread registry poisoned");
        let id = inner.fresh_uuid();
        inner.entries.insert(
            id,
            ChainEntry {
                chain: vec![sender.to_string(), target.to_string()],
                parent: None,
                root: id,
                children: Vec::new(),
                cancel: CancellationToken::new(),
                budget,
            },
        );
        id
    }

    /// Extend a chain toward `next`, allocating a fresh UUID for the hop.
    ///
    /// Returns `None` if the source entry is gone (pruned mid-flight).
    pub fn extend_chain(&self, id: Uuid, next: &str) -> Option<Uuid> {
        let mut inner = self.inner.lock().expect("thread registry poisoned");
        let (chain, root, cancel, budget) = {
            let entry = inner.entries.get(&id)?;
            let mut chain = entry.chain.clone();
            chain.push(next.to_string());
            (
                chain,
                entry.root,
                entry.cancel.child_token(),
                entry.budget.clone(),
            )
        };
        let child_id = inner.fresh_uuid();
        inner.entries.insert(
            child_id,
            ChainEntry {
                chain,
                parent: Some(id),
                root,
                children: Vec::new(),
                cancel,
                budget,
            },
        );
        if let Some(parent) = inner.entries.get_mut(&id) {
            parent.children.push(child_id);
        }
        Some(child_id)
    }

    /// Pop the responder off the chain and compute the response route.
    ///
    /// The responder's entry and every sub-chain beneath it are deleted (and
    /// their dispatches cancelled). For a root entry the origin's hop is
    /// kept until its branch closes.
    pub fn prune_for_response(&self, id: Uuid) -> Option<ResponseRoute> {
        let mut inner = self.inner.lock().expect("thread registry poisoned");
        inner.remove_descendants(id);

        let entry = inner.entries.get(&id)?;
        if entry.chain.len() < 2 {
            return None;
        }
        let caller = entry.chain[entry.chain.len() - 2].clone();
        let caller_is_origin = entry.chain.len() == 2;

        match entry.parent {
            Some(parent) => {
                let removed = inner.entries.remove(&id);
                if let Some(removed) = removed {
                    removed.cancel.cancel();
                }
                if let Some(parent_entry) = inner.entries.get_mut(&parent) {
                    parent_entry.children.retain(|c| *c != id);
                }
                Some(ResponseRoute {
                    thread: parent,
                    caller,
                    caller_is_origin,
                })
            }
            None => {
                // Root hop: the origin stays as the remaining chain.
                let entry = inner.entries.get_mut(&id)?;
                entry.chain.pop();
                Some(ResponseRoute {
                    thread: id,
                    caller,
                    caller_is_origin,
                })
            }
        }
    }

    /// Terminate this branch: the handler returned nothing.
    ///
    /// The tail is pruned; when the chain shrinks to its origin (or was an
    /// extension hop) the entry is deleted outright.
    pub fn prune_tail(&self, id: Uuid) {
        let mut inner = self.inner.lock().expect("thread registry poisoned");
        inner.remove_descendants(id);
        let remove = match inner.entries.get_mut(&id) {
            Some(entry) => {
                if entry.parent.is_some() {
                    true
                } else {
                    entry.chain.pop();
                    entry.chain.len() <= 1
                }
            }
            None => return,
        };
        if remove {
            let parent = inner.entries.get(&id).and_then(|e| e.parent);
            inner.remove_subtree(id);
            if let Some(parent) = parent {
                if let Some(parent_entry) = inner.entries.get_mut(&parent) {
                    parent_entry.children.retain(|c| *c != id);
                }
            }
        }
    }

    /// Delete the chain rooted at this UUID along with all descendants.
    pub fn prune_subtree(&self, id: Uuid) {
        let mut inner = self.inner.lock().expect("thread registry poisoned");
        inner.remove_subtree(id);
    }

    /// Terminate the whole family this hop belongs to (budget exhaustion).
    pub fn terminate_family(&self, id: Uuid) {
        let root = {
            let inner = self.inner.lock().expect("thread registry poisoned");
            inner.entries.get(&id).map(|e| e.root)
        };
        if let Some(root) = root {
            self.prune_subtree(root);
        }
    }

    pub fn lookup(&self, id: Uuid) -> Option<ChainInfo> {
        let inner = self.inner.lock().expect("thread registry poisoned");
        inner.entries.get(&id).map(|entry| ChainInfo {
            chain: entry.chain.clone(),
            root: entry.root,
        })
    }

    pub fn budget(&self, id: Uuid) -> Option<Arc<TokenBudget>> {
        let inner = self.inner.lock().expect("thread registry poisoned");
        inner.entries.get(&id).map(|entry| entry.budget.clone())
    }

    pub fn cancel_token(&self, id: Uuid) -> Option<CancellationToken> {
        let inner = self.inner.lock().expect("thread registry poisoned");
        inner.entries.get(&id).map(|entry| entry.cancel.clone())
    }

    pub fn contains(&self, id: Uuid) -> bool {
        let inner = self.inner.lock().expect("thread registry poisoned");
        inner.entries.contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        let inner = self.inner.lock().expect("thread registry poisoned");
        inner.entries.len()
    }
}
