// Analytics Module - indicator engine, OHLC aggregation, pattern scanning

pub mod indicators;
pub mod ohlc;
pub mod patterns;

pub use ohlc::aggregate;
pub use patterns::PatternScanner;
