//! Chain module - canonical chain tracking, side chains and reorganization

mod blockchain;
mod mutator;
mod pools;
mod reorg;

pub use blockchain::*;
pub use pools::*;
pub use reorg::ReorgSummary;
