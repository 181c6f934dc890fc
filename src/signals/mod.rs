pub mod fusion;
pub mod indicators;
pub mod model;
