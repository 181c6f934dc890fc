pub mod keepalive;
pub mod latency;
pub mod pnl;
