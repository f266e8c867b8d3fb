pub mod attention;
pub mod config;
pub mod decoder;
pub mod embedding;
pub mod init;
pub mod layers;
pub mod transformer;

// Re-exports for convenience
pub use attention::{MASK_FILL, MultiHeadAttention, causal_mask, mask_fill, padding_mask};
pub use config::{Activation, GptConfig, NormPlacement};
pub use decoder::{CompositeDecoder, DecoderLayer};
pub use embedding::{PositionalEncoding, TokenEmbedding};
pub use layers::{DecoderBlock, PositionWiseFfn, SublayerConnection};
pub use transformer::{Gpt, parameter_count};
