// src/api/mod.rs

pub mod query;
pub mod types;

pub use query::{route_query, QueryService};
