pub mod channel;
pub mod handshake;
pub mod mock;
pub mod stream;
pub mod transport;
pub mod wire;

pub use handshake::{establish, Handshake, SymmetricKey};
pub use stream::FrameStream;
pub use transport::{ByteStream, HttpTransport, Transport};
pub use wire::{ContextPayload, ExchangePayload, Frame, GenerationParams, RequestEnvelope, SummarizePayload};
