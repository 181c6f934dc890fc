pub mod candle;
pub mod frame;
pub mod order;
pub mod signal;
