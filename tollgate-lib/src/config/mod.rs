mod backend;
mod identity;
mod limits;
mod loader;
mod root;
mod store;
mod telemetry;
mod timeout;
mod validator;

pub use backend::{BackendPoolConfig, Upstream};
pub use identity::IdentityConfig;
pub use limits::{default_tiers, QuotaConfig, TierConfig};
pub use loader::{load_from_path, load_from_str};
pub use root::Config;
pub use store::{StoreBackend, StoreConfig};
pub use telemetry::{LoggingConfig, TelemetryConfig};
pub use timeout::{KeepAliveConfig, TimeoutConfig};
pub use validator::{validate, validate_quotas, validate_tiers};
