//! REST driving adapter
//! One JSON control plane, served over TCP and a local unix socket

pub mod handlers;
pub mod router;
pub mod server;

pub use handlers::AppState;
pub use router::build_router;
pub use server::{pick_socket_path, serve_tcp, serve_unix};
