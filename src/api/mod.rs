pub mod session_routes;
pub mod session_websocket;

pub use session_routes::routes;
