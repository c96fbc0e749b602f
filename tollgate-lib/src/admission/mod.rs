//! Request admission: the seam between the limiters and the HTTP surface.

mod gate;
mod outcome;
mod response;

pub use gate::{AdmissionGate, RequestInfo};
pub use outcome::{tier_code, Admission, Pass, RateMeta, Rejection};
pub use response::{
    apply_rate_headers, format_duration, identity_error_response, rejection_response, ErrorBody,
    LimitDetails, MISSING_IDENTITY_CODE, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
};
