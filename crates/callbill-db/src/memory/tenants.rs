use async_trait::async_trait;
use callbill_core::{models::Tenant, traits::TenantDirectory, AppError, AppResult};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Tenant directory backed by a map, provisioned at startup
#[derive(Default)]
pub struct MemoryTenantDirectory {
    tenants: RwLock<HashMap<i32, Tenant>>,
}

impl MemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision or replace a tenant
    pub fn insert(&self, tenant: Tenant) {
        self.tenants.write().insert(tenant.id, tenant);
    }
}

#[async_trait]
impl TenantDirectory for MemoryTenantDirectory {
    async fn get_tenant(&self, tenant_id: i32) -> AppResult<Tenant> {
        self.tenants
            .read()
            .get(&tenant_id)
            .cloned()
            .ok_or(AppError::TenantNotFound(tenant_id))
    }
}
