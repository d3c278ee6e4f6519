pub mod admin;
pub mod ai;
pub mod credits;
