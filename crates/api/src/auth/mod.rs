//! Authentication primitives.
//!
//! Users sign in through the hosted auth service; this API only verifies the
//! HS256 access tokens it issues.

pub mod jwt;
