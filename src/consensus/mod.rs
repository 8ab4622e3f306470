//! Consensus module - Block structure, validation, difficulty, and rewards

mod block;
mod params;
mod difficulty;
mod rewards;
mod validation;
mod genesis;
pub mod pow;

pub use block::*;
pub use params::*;
pub use difficulty::*;
pub use rewards::*;
pub use validation::*;
pub use genesis::*;
