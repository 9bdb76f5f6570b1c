pub mod http;

pub use http::{AppState, Server, router};
