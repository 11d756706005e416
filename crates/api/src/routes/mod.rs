//! HTTP route handlers

pub mod info;
pub mod predict;
