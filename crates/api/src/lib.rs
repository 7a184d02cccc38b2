pub mod container;
pub mod error;
pub mod router;
pub mod server;
pub mod state;
