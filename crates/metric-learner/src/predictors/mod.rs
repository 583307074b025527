pub mod predict;
pub mod signature;

pub use predict::*;
pub use signature::*;
