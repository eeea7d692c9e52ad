mod address;

pub use address::AddressResolver;
pub use address::PartitionAddresses;
pub use address::ReplicaAddress;
