mod consistency;
mod diagnostics;
mod lsn;
mod request;
mod status;

pub use consistency::ConsistencyLevel;
pub use consistency::OperationType;
pub use consistency::ReadMode;
pub use consistency::ResourceType;
pub use diagnostics::ClientRequestStatistics;
pub use diagnostics::RequestChargeTracker;
pub use diagnostics::StoreResponseRecord;
pub use lsn::Lsn;
pub use request::LogicalRequest;
pub use request::RoutingContext;
pub use request::WriteBarrierKind;
pub use request::WriteBarrierState;
pub use status::StatusCode;
pub use status::SubStatusCode;
