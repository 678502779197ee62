pub mod doh;
pub mod splitter;

pub use doh::{DnsOutcome, DohClient};
pub use splitter::PacketSplitter;
