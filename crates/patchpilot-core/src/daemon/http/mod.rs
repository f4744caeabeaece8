pub mod api;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod ws;

pub use error::ApiError;
pub use server::{HttpConfig, HttpServer};
