//! Inter-tenant connection directory.
//!
//! Cross-tenant transfers are only allowed between tenants holding an active
//! connection. Connections are symmetric.

use std::collections::HashSet;
use std::sync::RwLock;

use tracing::info;

use stockflow_core::TenantId;

use crate::store::StoreError;

pub trait TenantDirectory: Send + Sync {
    fn is_connected(&self, a: TenantId, b: TenantId) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryTenantDirectory {
    active: RwLock<HashSet<(TenantId, TenantId)>>,
}

fn pair(a: TenantId, b: TenantId) -> (TenantId, TenantId) {
    if a <= b { (a, b) } else { (b, a) }
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, a: TenantId, b: TenantId) -> Result<(), StoreError> {
        if a == b {
            return Err(StoreError::conflict("a tenant cannot connect to itself"));
        }
        let mut active = self.active.write().map_err(|_| StoreError::backend("lock poisoned"))?;
        if active.insert(pair(a, b)) {
            info!(tenant = %a, peer = %b, "tenant connection activated");
        }
        Ok(())
    }

    pub fn disconnect(&self, a: TenantId, b: TenantId) -> Result<(), StoreError> {
        let mut active = self.active.write().map_err(|_| StoreError::backend("lock poisoned"))?;
        if active.remove(&pair(a, b)) {
            info!(tenant = %a, peer = %b, "tenant connection deactivated");
        }
        Ok(())
    }
}

impl TenantDirectory for InMemoryTenantDirectory {
    fn is_connected(&self, a: TenantId, b: TenantId) -> Result<bool, StoreError> {
        let active = self.active.read().map_err(|_| StoreError::backend("lock poisoned"))?;
        Ok(active.contains(&pair(a, b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connections_are_symmetric_and_revocable() {
        let dir = InMemoryTenantDirectory::new();
        let (a, b) = (TenantId::new(), TenantId::new());

        assert!(!dir.is_connected(a, b).unwrap());
        dir.connect(a, b).unwrap();
        assert!(dir.is_connected(b, a).unwrap());

        dir.disconnect(b, a).unwrap();
        assert!(!dir.is_connected(a, b).unwrap());
    }

    #[test]
    fn self_connection_is_refused() {
        let dir = InMemoryTenantDirectory::new();
        let a = TenantId::new();
        assert!(dir.connect(a, a).is_err());
    }
}
