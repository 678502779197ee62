pub mod dialer;
pub mod dispatch;
pub mod socks5;

pub use dialer::{dial_direct, resolve_address, CONNECT_TIMEOUT};
pub use dispatch::{Attempt, Dispatcher};
pub use socks5::Socks5Endpoint;
