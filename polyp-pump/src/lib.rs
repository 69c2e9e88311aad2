//! Registry, pipelines, thread registry, and the central message pump.
//!
//! This crate is the trusted plane of the polyp substrate. The
//! [`Organism`] ties the pieces together: register listeners, start the
//! pump, inject transport bytes, and read egress frames from the outbox.

pub mod meta;
pub mod organism;
pub mod pipeline;
pub mod pump;
pub mod registry;
pub mod threads;

pub use organism::{Organism, OrganismError};
pub use pump::{EgressFrame, IngressOrigin, Outbox, WitnessFn};
pub use registry::{
    derive_root_tag, Listener, ListenerSpec, Registry, RegistrySnapshot,
    RESPONSE_SEMANTICS_WARNING,
};
pub use threads::{ChainInfo, ResponseRoute, ThreadRegistry};
