pub mod anchor;
pub mod app;
pub mod config;
pub mod crypto;
pub mod error;
pub mod locks;
pub mod pipeline;
pub mod reconcile;
pub mod server;
pub mod state;
pub mod storage;
pub mod verify;
