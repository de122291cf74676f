//! esh - browser-delegated device login for the esh CLI.
//!
//! The server side (`web`, `device`, `storage`) lets a CLI obtain an API token
//! by having the user approve the request in a browser. The `client` module is
//! the CLI half: it starts a request, waits for approval and stores the token.

pub mod audit;
pub mod cipher;
pub mod client;
pub mod device;
pub mod entities;
pub mod errors;
pub mod jobs;
pub mod rate_limit;
pub mod session;
pub mod settings;
pub mod storage;
pub mod token;
pub mod web;
