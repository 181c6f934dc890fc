pub mod candles;
pub mod protocol;
