#![forbid(unsafe_code)]

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod limiter;
pub mod proxy;
pub mod store;
pub mod telemetry;

pub use admission::{Admission, AdmissionGate, Pass, Rejection, RequestInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_from_path, Config};
pub use error::{Result, TollgateError};
pub use identity::{Identity, IdentityError, IdentityResolver};
pub use limiter::{Decision, QuotaTracker, QuotaVerdict, TierEvaluator};
pub use proxy::{run, serve, GateContext};
pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore, StoreAdapter, StoreError};
