use crate::error::StoreError;
use crate::model::{LogicalRequest, SubStatusCode};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReplicaAddress {
    pub uri: String,
    pub is_primary: bool,
}

impl ReplicaAddress {
    pub fn primary(uri: impl Into<String>) -> Self {
        ReplicaAddress {
            uri: uri.into(),
            is_primary: true,
        }
    }

    pub fn secondary(uri: impl Into<String>) -> Self {
        ReplicaAddress {
            uri: uri.into(),
            is_primary: false,
        }
    }
}

/// The replica set currently serving a request's partition, as the address cache sees it.
#[derive(Clone, Debug)]
pub struct PartitionAddresses {
    pub replicas: Vec<ReplicaAddress>,
    /// Collection the cache resolved the request to. Differs from the request's collection when
    /// the collection was recreated under the same name.
    pub collection_rid: String,
}

impl PartitionAddresses {
    pub fn primary(&self) -> Option<&ReplicaAddress> {
        self.replicas.iter().find(|replica| replica.is_primary)
    }
}

#[async_trait::async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve_addresses(
        &self,
        request: &LogicalRequest,
        force_refresh: bool,
    ) -> Result<PartitionAddresses, StoreError>;

    /// Fire-and-forget refresh of the cached addresses of the request's partition.
    fn start_background_refresh(&self, request: &LogicalRequest);

    async fn resolve_replicas(
        &self,
        request: &LogicalRequest,
        include_primary: bool,
        force_refresh: bool,
    ) -> Result<Vec<ReplicaAddress>, StoreError> {
        let addresses = self.resolve_addresses(request, force_refresh).await?;
        Ok(addresses
            .replicas
            .into_iter()
            .filter(|replica| include_primary || !replica.is_primary)
            .collect())
    }

    async fn resolve_primary(
        &self,
        request: &LogicalRequest,
        force_refresh: bool,
    ) -> Result<ReplicaAddress, StoreError> {
        let addresses = self.resolve_addresses(request, force_refresh).await?;
        addresses
            .primary()
            .cloned()
            .ok_or_else(|| StoreError::gone(SubStatusCode::UNKNOWN, "no primary replica resolved for the partition"))
    }
}
