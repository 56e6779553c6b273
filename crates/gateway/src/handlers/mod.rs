//! API handlers module

pub mod bootstrap;
pub mod health;
pub mod organizations;
