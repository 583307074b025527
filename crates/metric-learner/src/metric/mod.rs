//! The LM-backed metric: prompt construction, score parsing, demonstrations.

pub mod demonstration;
pub mod scorer;
pub mod template;

pub use demonstration::*;
pub use scorer::*;
pub use template::*;
