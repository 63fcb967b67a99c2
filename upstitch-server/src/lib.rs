//! HTTP front end for the upstitch upload receiver

pub mod config;
pub mod context;
pub mod handlers;
pub mod server;

pub use config::ServerConfig;
pub use context::RequestContext;
pub use handlers::{handle_request, AppState};
pub use server::UploadServer;
