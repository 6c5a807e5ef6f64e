mod history;

pub use history::*;

// Block height type
pub type BlockNumber = u64;
