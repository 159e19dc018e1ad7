pub mod cert;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod import;
pub mod issuer;
pub mod registry;
pub mod renew;
pub mod request;
pub mod responder;
pub mod server;
pub mod solver;
pub mod store;
pub mod time;
pub mod trust_store;

pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
