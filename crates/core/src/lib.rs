//! Core types for Entropy.
//!
//! Holds the error taxonomy every component returns, the resource data model
//! (resources, revisions, filters, URN derivation) and module rows.

pub mod context;
pub mod error;
pub mod module;
pub mod resource;
pub mod result;

pub use context::{Actor, Clock, FixedClock, SystemClock, USER_ID_HEADER};
pub use error::{Error, ErrorKind, Result};
pub use module::{Module, module_urn};
pub use resource::{
    Filter, Resource, Revision, RevisionsSelector, Spec, State, Status, SyncResult,
    UpdateRequest, generate_urn, labels_to_tags, tags_to_labels, validate_name,
};
pub use result::{ErrorContext, OptionExt};
