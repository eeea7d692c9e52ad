#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConsistencyLevel {
    Strong,
    BoundedStaleness,
    Session,
    Eventual,
    ConsistentPrefix,
}

/// How a read contacts the replica set. Derived from the consistency level, except requests
/// pinned to a replica index always read `Primary`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadMode {
    Primary,
    Strong,
    BoundedStaleness,
    Any,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperationType {
    Read,
    ReadFeed,
    Query,
    Head,
    Create,
    Replace,
    Upsert,
    Patch,
    Delete,
    Batch,
    ExecuteStoredProcedure,
}

impl OperationType {
    pub fn is_write(&self) -> bool {
        match self {
            OperationType::Create
            | OperationType::Replace
            | OperationType::Upsert
            | OperationType::Patch
            | OperationType::Delete
            | OperationType::Batch
            | OperationType::ExecuteStoredProcedure => true,
            OperationType::Read | OperationType::ReadFeed | OperationType::Query | OperationType::Head => false,
        }
    }

    pub fn is_read(&self) -> bool {
        !self.is_write()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Database,
    Collection,
    Document,
    StoredProcedure,
    Offer,
    PartitionKeyRange,
}

impl ResourceType {
    /// Master resources live on the system replica set, which has its own size policy.
    pub(crate) fn is_read_from_master(&self, operation: OperationType) -> bool {
        match self {
            ResourceType::Database | ResourceType::Offer | ResourceType::PartitionKeyRange => true,
            ResourceType::Collection => {
                matches!(operation, OperationType::ReadFeed | OperationType::Query)
            }
            ResourceType::Document | ResourceType::StoredProcedure => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_feed_reads_go_to_master() {
        assert!(ResourceType::Collection.is_read_from_master(OperationType::ReadFeed));
        assert!(!ResourceType::Collection.is_read_from_master(OperationType::Read));
        assert!(!ResourceType::Document.is_read_from_master(OperationType::Query));
        assert!(ResourceType::Database.is_read_from_master(OperationType::Read));
    }

    #[test]
    fn batch_is_a_write() {
        assert!(OperationType::Batch.is_write());
        assert!(OperationType::Head.is_read());
    }
}
