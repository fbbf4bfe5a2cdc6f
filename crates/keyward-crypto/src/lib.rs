pub mod aead;
pub mod error;
pub mod secret;
pub mod store_key;

pub use error::{CryptoError, CryptoResult};
pub use secret::Secret;
pub use store_key::StoreKey;
