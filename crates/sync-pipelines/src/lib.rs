//! # sync-pipelines
//!
//! Per-entity wiring for the three pipelines the engine runs: queries
//! (contract-shaped, not literal SQL dialects), index mappings, and
//! `Transformer` implementations built on `sync-core`'s collaborator
//! traits.
//!
//! - [`filmwork`]: denormalized film-work documents, persons
//!   partitioned by role.
//! - [`genre`]: `{id, name}`, addressed by `name`.
//! - [`person`]: `{id, full_name, movies}`.

pub mod filmwork;
pub mod genre;
pub mod person;
