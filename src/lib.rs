//! docguard - identity-gated document delivery
//!
//! - Runtime security monitor for the document viewer (`monitor`)
//! - Access gate: bearer identity plus account status (`gate`)
//! - Signed URLs, compatibility table, proxy and object store (`delivery`)
//! - HTTP server hosting the document API and the storage origin (`server`)

pub mod cli;
pub mod config;
pub mod delivery;
pub mod gate;
pub mod monitor;
pub mod paths;
pub mod server;

pub use config::Config;
