pub mod generate;
pub mod sampling;

pub use generate::{GenerationConfig, generate};
pub use sampling::{argmax, sample};
