pub mod handler;
pub mod listener;
pub mod pipe;

pub use handler::{ws_upgrade, GatewayContext};
pub use listener::GatewayServer;
pub use pipe::{run_pipe, safe_close_ws, PipeEnd, PipeOutcome};
