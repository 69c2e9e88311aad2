//! Core data model for the polyp message substrate.
//!
//! This crate holds the contracts everything else is written against:
//! payload descriptors and values, the handler trait and its response sum,
//! trusted dispatch metadata, token budgets, configuration, and the shared
//! error taxonomy. It contains no XML and no routing logic.

pub mod budget;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod handler;

pub use budget::TokenBudget;
pub use config::{
    AuthLevel, MetaAccess, MetaPolicy, OrganismConfig, SchedulingPolicy,
};
pub use descriptor::{
    DescriptorError, FieldDescriptor, FieldKind, PayloadDescriptor, PayloadRecord, PayloadValue,
};
pub use error::{HandlerError, RegisterError, SystemErrorCode};
pub use handler::{
    FnHandler, Handler, HandlerMetadata, HandlerResponse, Payload, UsageMeter, SELF_TARGET,
};
