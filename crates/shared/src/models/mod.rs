pub mod account;
pub mod bundle;
pub mod keys;
pub mod node;

pub use account::{AccountContext, ProviderCredentials};
pub use bundle::JoinCredentialsBundle;
pub use node::{NodeSpec, ProvisionMode, SpotShape, Taint, ValidationError};
