mod fanout;
mod quorum;
mod reader;
mod replica_response;
mod writer;

pub use fanout::FanoutRead;
pub use fanout::ReplicaFanoutReader;
pub use quorum::QuorumConvergence;
pub use reader::ConsistencyDispatcher;
pub use replica_response::ReplicaResponse;
pub use writer::BarrierWriteCoordinator;
