//! API handlers module

pub mod docs;
pub mod health;
pub mod rag;
