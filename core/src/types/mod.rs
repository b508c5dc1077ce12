//! Plain data types shared across the controller.

pub mod config;
pub mod observed;
pub mod result;
pub mod role;
