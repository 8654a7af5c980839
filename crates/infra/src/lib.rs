//! Infrastructure layer: event store backends, command dispatch, read models.

pub mod code_sequence;
pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
