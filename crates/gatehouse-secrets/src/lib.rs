//! Secret providers and masking for Gatehouse job runners.

pub mod manager;
pub mod providers;

pub use gatehouse_core::secrets::SecretValue;
pub use manager::{SecretManager, SecretManagerConfig, mask_values};
pub use providers::{EnvProvider, FileProvider, SecretProvider};
