//! Organism configuration surface.

use serde::{Deserialize, Serialize};

pub const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_THREAD_TOKEN_BUDGET: u64 = 100_000;
pub const DEFAULT_FAIRNESS_WINDOW: u32 = 4;
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 20;
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 64;

/// How the pump orders ready messages across active threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingPolicy {
    /// Round-robin across threads; no thread gets more than the fairness
    /// window of consecutive dispatches while another waits.
    BreadthFirst,
    /// Drain one thread's ready messages before moving on.
    DepthFirst,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self::BreadthFirst
    }
}

/// Access level required for a meta request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaAccess {
    None,
    Authenticated,
    Admin,
}

/// Authentication level attached to an ingress origin by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevel {
    Anonymous,
    Authenticated,
    Admin,
}

impl AuthLevel {
    /// Whether this level satisfies the given access requirement.
    pub fn permits(&self, access: MetaAccess) -> bool {
        match access {
            MetaAccess::None => false,
            MetaAccess::Authenticated => *self >= AuthLevel::Authenticated,
            MetaAccess::Admin => *self >= AuthLevel::Admin,
        }
    }
}

/// Policy gates for the introspection namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaPolicy {
    /// Whether `<list-capabilities/>` is answered at all.
    #[serde(default = "default_true")]
    pub list: bool,
    #[serde(default = "default_authenticated")]
    pub schema: MetaAccess,
    #[serde(default = "default_authenticated")]
    pub example: MetaAccess,
    #[serde(default = "default_authenticated")]
    pub prompt: MetaAccess,
}

fn default_true() -> bool {
    true
}

fn default_authenticated() -> MetaAccess {
    MetaAccess::Authenticated
}

impl Default for MetaPolicy {
    fn default() -> Self {
        Self {
            list: true,
            schema: MetaAccess::Authenticated,
            example: MetaAccess::Authenticated,
            prompt: MetaAccess::Authenticated,
        }
    }
}

/// Top-level configuration for one organism.
///
/// Listeners are registered programmatically (handlers are code, not
/// config); this object carries the scalar and policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganismConfig {
    pub thread_scheduling: SchedulingPolicy,
    pub meta_policy: MetaPolicy,
    pub handler_timeout_default_secs: u64,
    pub thread_token_budget_default: u64,
    /// Max consecutive dispatches of one thread under breadth-first
    /// scheduling while another thread has ready messages.
    pub fairness_window: u32,
    pub max_concurrent_handlers: usize,
    pub max_chain_depth: usize,
}

impl Default for OrganismConfig {
    fn default() -> Self {
        Self {
            thread_scheduling: SchedulingPolicy::default(),
            meta_policy: MetaPolicy::default(),
            handler_timeout_default_secs: DEFAULT_HANDLER_TIMEOUT_SECS,
            thread_token_budget_default: DEFAULT_THREAD_TOKEN_BUDGET,
            fairness_window: DEFAULT_FAIRNESS_WINDOW,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
        }
    }
}

impl OrganismConfig {
    pub fn with_scheduling(mut self, policy: SchedulingPolicy) -> Self {
        self.thread_scheduling = policy;
        self
    }

    pub fn with_handler_timeout_secs(mut self, secs: u64) -> Self {
        self.handler_timeout_default_secs = secs;
        self
    }

    pub fn with_thread_token_budget(mut self, tokens: u64) -> Self {
        self.thread_token_budget_default = tokens;
        self
    }

    pub fn with_fairness_window(mut self, window: u32) -> Self {
        self.fairness_window = window.max(1);
        self
    }

    pub fn with_max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth;
        self
    }

    pub fn with_meta_policy(mut self, policy: MetaPolicy) -> Self {
        self.meta_policy = policy;
        self
    }
}
