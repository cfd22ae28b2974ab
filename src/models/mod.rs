pub mod cycle;
pub mod proxy;

pub use cycle::*;
pub use proxy::*;
