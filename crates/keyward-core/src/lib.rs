pub mod config;
pub mod lifecycle;
pub mod protection;

pub use protection::{ProtectionHandle, ProtectionState};
