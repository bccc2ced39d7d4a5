pub mod errors;
pub mod ids;
pub mod message;
pub mod session;

pub use errors::ExchangeError;
pub use ids::{ExchangeId, SessionId};
pub use message::{Message, Role};
pub use session::{ChatSession, DEFAULT_TITLE};
