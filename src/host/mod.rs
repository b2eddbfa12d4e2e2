//! Host-facing contract, command router and stdio bridge for native shells.

pub mod channel;
pub mod contract;
pub mod stdio;
