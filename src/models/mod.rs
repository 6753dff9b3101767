//! Core data models for the drive service.
//!
//! `object` mirrors what the backing store persists; `resource` is the
//! per-request, never-persisted view handed to API callers.

pub mod object;
pub mod resource;
