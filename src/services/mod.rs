//! Virtual filesystem layer over the flat object store.

pub mod archive;
pub mod drive_service;
pub mod error;
pub mod path_canonicalizer;
pub mod resource_mapper;
pub mod resources;
pub mod traversal;
