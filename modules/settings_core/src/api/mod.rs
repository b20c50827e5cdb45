//! Adapters exposing the settings manager to collaborators

pub mod native;
