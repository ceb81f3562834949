//! JSON protocol structs exchanged between a certificate-authentication
//! client and the challenge/verify server.

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![warn(missing_docs)]

pub mod auth;

pub use auth::*;
