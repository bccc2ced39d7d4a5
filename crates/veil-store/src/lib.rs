//! Session persistence for confidential chats. Plaintext history lives only
//! here, on the local machine; nothing in this crate touches the network.

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{SessionStore, STORE_FILE};
