//! Domain types shared by every Nano Banana backend crate.
//!
//! Nothing in here touches the database or the network.

pub mod credits;
pub mod error;
pub mod media;
pub mod pricing;
pub mod roles;
pub mod types;
