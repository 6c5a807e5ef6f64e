mod chain;
mod query;
mod stream;

pub use chain::*;
pub use query::*;
pub use stream::*;
