pub mod credentials;
pub mod refresh;
pub mod session;

pub use credentials::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore, StoredCredentials};
pub use refresh::{HttpRefreshEndpoint, RefreshEndpoint, TokenGrant, TokenRefreshCoordinator};
pub use session::AuthSession;
