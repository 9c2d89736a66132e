//! krmfleet Engine - package materialization and composition
//!
//! This crate turns a resolved fleet into files on disk and back into KRM
//! objects:
//! - `Materializer`: copies packages out of upstream working copies, renders
//!   templated metadata and writes Kptfile provenance
//! - `filesystem_to_objects`: reads materialized files as resource-list items
//! - `FleetComposer`: runs every Fleet of a resource list end to end

pub mod bridge;
pub mod composer;
pub mod error;
pub mod filters;
pub mod materialize;
pub mod provenance;
pub mod template;

pub use bridge::{BridgeOptions, filesystem_to_objects};
pub use composer::{ComposeOptions, FleetComposer};
pub use error::{EngineError, Result, TemplateErrorKind};
pub use materialize::Materializer;
pub use provenance::update_kpt_metadata;
pub use template::{MetadataRenderer, TemplateContext};
