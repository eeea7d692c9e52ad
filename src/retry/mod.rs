mod gone_policy;
mod session_mismatch;

pub use gone_policy::GoneRetryPolicy;
pub use gone_policy::RetryDecision;
pub use gone_policy::RetryPolicyContext;

pub(crate) use session_mismatch::SessionTokenMismatchRetryPolicy;
