pub mod errors;
pub mod lm;
pub mod module;

pub use errors::*;
pub use lm::*;
pub use module::*;
