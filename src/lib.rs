#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

//! Forward computation of a decoder-only GPT transformer on candle.

pub mod batch;
pub mod error;
pub mod inference;
pub mod model;

pub use batch::Batch;
pub use error::{GptError, Result};
pub use model::{Gpt, GptConfig};
