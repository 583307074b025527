pub mod example;
pub mod instance;
pub mod prediction;
pub mod store;

pub use example::*;
pub use instance::*;
pub use prediction::*;
pub use store::*;
