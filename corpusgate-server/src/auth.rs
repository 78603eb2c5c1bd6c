// Copyright 2025 Corpusgate Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Auth Resolver: maps an opaque bearer credential to a tenant identity.
//!
//! Resolution order:
//! 1. Empty credential: invalid, no backend call.
//! 2. Foreign-system token shape (the backing store's own JWT session
//!    tokens start with `eyJ`): invalid, no backend call. Gateway keys are
//!    structurally distinct, so this cannot reject a legitimate caller.
//! 3. Unexpired cache hit: cached tenant, no backend call.
//! 4. Directory lookup restricted to active keys; a hit populates the
//!    cache and fires a detached last-used update whose failure is logged
//!    and discarded.
//!
//! With no directory configured the resolver short-circuits to
//! `valid=true, tenant=None` (open mode); every tenant-scoped operation
//! must handle the `None` tenant by refusing to proceed.

use crate::directory::TenantDirectory;
use corpusgate_core::TenantId;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Prefix of the backing store's own session tokens (base64 `{"`, a JWT).
const FOREIGN_TOKEN_PREFIX: &str = "eyJ";

/// Outcome of resolving one credential.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub tenant: Option<TenantId>,
    pub valid: bool,
}

impl Resolution {
    fn invalid() -> Self {
        Self {
            tenant: None,
            valid: false,
        }
    }

    fn open() -> Self {
        Self {
            tenant: None,
            valid: true,
        }
    }

    fn tenant(tenant: TenantId) -> Self {
        Self {
            tenant: Some(tenant),
            valid: true,
        }
    }
}

pub struct AuthResolver {
    directory: Option<Arc<dyn TenantDirectory>>,
    /// credential -> tenant; only valid resolutions are cached.
    cache: Cache<String, TenantId>,
}

impl AuthResolver {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

    pub fn new(directory: Option<Arc<dyn TenantDirectory>>, ttl: Duration) -> Self {
        Self {
            directory,
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn with_default_ttl(directory: Option<Arc<dyn TenantDirectory>>) -> Self {
        Self::new(directory, Self::DEFAULT_TTL)
    }

    /// True when no backing directory is configured.
    pub fn open_mode(&self) -> bool {
        self.directory.is_none()
    }

    pub async fn resolve(&self, credential: &str) -> Resolution {
        if credential.is_empty() {
            return Resolution::invalid();
        }

        if credential.starts_with(FOREIGN_TOKEN_PREFIX) {
            tracing::debug!("Rejecting foreign-system token shape without backend lookup");
            return Resolution::invalid();
        }

        let Some(directory) = &self.directory else {
            return Resolution::open();
        };

        if let Some(tenant) = self.cache.get(credential) {
            return Resolution::tenant(tenant);
        }

        let tenant = match directory.lookup_api_key(credential).await {
            Ok(Some(tenant)) => tenant,
            Ok(None) => return Resolution::invalid(),
            Err(err) => {
                tracing::warn!("Credential lookup failed: {}", err);
                return Resolution::invalid();
            }
        };

        self.cache.insert(credential.to_string(), tenant.clone());

        // Last-used bookkeeping must never block or fail resolution.
        let directory = directory.clone();
        let credential = credential.to_string();
        tokio::spawn(async move {
            if let Err(err) = directory.touch_api_key(&credential).await {
                tracing::debug!("Ignoring last-used update failure: {}", err);
            }
        });

        Resolution::tenant(tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;

    fn resolver_with(dir: Arc<MemoryDirectory>, ttl: Duration) -> AuthResolver {
        AuthResolver::new(Some(dir as Arc<dyn TenantDirectory>), ttl)
    }

    #[tokio::test]
    async fn empty_credential_is_invalid() {
        let resolver = AuthResolver::with_default_ttl(None);
        // Even in open mode an empty credential never resolves.
        assert!(!resolver.resolve("").await.valid);
    }

    #[tokio::test]
    async fn foreign_token_shape_is_rejected_without_lookup() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add_api_key("eyJhbGciOiJIUzI1NiJ9.x.y", TenantId::new("t-1"), true);
        let resolver = resolver_with(dir, AuthResolver::DEFAULT_TTL);

        // Shaped like the backing store's session token, so it must be
        // rejected even though a matching row exists.
        let resolution = resolver.resolve("eyJhbGciOiJIUzI1NiJ9.x.y").await;
        assert!(!resolution.valid);
    }

    #[tokio::test]
    async fn open_mode_resolves_to_no_tenant() {
        let resolver = AuthResolver::with_default_ttl(None);
        let resolution = resolver.resolve("cg_anything").await;
        assert!(resolution.valid);
        assert_eq!(resolution.tenant, None);
    }

    #[tokio::test]
    async fn unknown_credential_is_invalid() {
        let dir = Arc::new(MemoryDirectory::new());
        let resolver = resolver_with(dir, AuthResolver::DEFAULT_TTL);
        assert!(!resolver.resolve("cg_unknown").await.valid);
    }

    #[tokio::test]
    async fn cache_returns_same_tenant_within_ttl() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add_api_key("cg_key", TenantId::new("t-1"), true);
        let resolver = resolver_with(dir.clone(), AuthResolver::DEFAULT_TTL);

        let first = resolver.resolve("cg_key").await;
        assert_eq!(first.tenant, Some(TenantId::new("t-1")));

        // Revoke behind the cache; within the TTL the cached tenant is
        // still served and matches the first resolution.
        dir.add_api_key("cg_key", TenantId::new("t-1"), false);
        let second = resolver.resolve("cg_key").await;
        assert!(second.valid);
        assert_eq!(second.tenant, first.tenant);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched_not_served() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add_api_key("cg_key", TenantId::new("t-1"), true);
        let resolver = resolver_with(dir.clone(), Duration::from_millis(20));

        assert!(resolver.resolve("cg_key").await.valid);

        dir.add_api_key("cg_key", TenantId::new("t-1"), false);
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Entry expired; the stale tenant must not be served.
        assert!(!resolver.resolve("cg_key").await.valid);
    }

    #[tokio::test]
    async fn last_used_is_recorded_out_of_band() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add_api_key("cg_key", TenantId::new("t-1"), true);
        let resolver = resolver_with(dir.clone(), AuthResolver::DEFAULT_TTL);

        assert!(resolver.resolve("cg_key").await.valid);

        // The touch runs on a detached task; give it a beat.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(dir.last_used("cg_key").is_some());
    }
}
