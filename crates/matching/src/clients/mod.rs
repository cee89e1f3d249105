//! Collaborator interfaces and their in-process adapters

pub mod notify;
pub mod route;
