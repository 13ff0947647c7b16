//! Flavor cache
//!
//! Flavor details change rarely but are read on every MachineSet reconcile
//! and every machine validation. Results are cached per flavor name, with a
//! shorter lifetime for failed lookups so a missing flavor is retried at a
//! fixed interval.

use chrono::{DateTime, TimeDelta, Utc};
use openstack_client::{ComputeService, Flavor};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Age at which a successful lookup is refreshed.
pub const STALE_AFTER: TimeDelta = TimeDelta::seconds(300);

/// Age at which a failed lookup is retried.
pub const REFRESH_FAILURE_AFTER: TimeDelta = TimeDelta::seconds(60);

/// Cached lookup failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlavorLookupError {
    #[error("failed to resolve flavor ID: {0}")]
    ResolveId(String),

    #[error("failed to find flavor information: {0}")]
    Info(String),
}

#[derive(Debug, Clone)]
struct FlavorEntry {
    info: Option<Flavor>,
    error: Option<FlavorLookupError>,
    updated: DateTime<Utc>,
}

impl FlavorEntry {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let ttl = if self.error.is_some() {
            REFRESH_FAILURE_AFTER
        } else {
            STALE_AFTER
        };
        now - self.updated >= ttl
    }
}

/// Per-name cache of flavor details.
#[derive(Debug, Default)]
pub struct FlavorCache {
    // Held across the refresh so concurrent readers of one name wait for it
    entries: Mutex<HashMap<String, FlavorEntry>>,
}

impl FlavorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flavor details for `flavor_name`, or the cached lookup error.
    pub async fn get(
        &self,
        compute: &dyn ComputeService,
        flavor_name: &str,
    ) -> Result<Flavor, FlavorLookupError> {
        self.get_at(compute, flavor_name, Utc::now()).await
    }

    async fn get_at(
        &self,
        compute: &dyn ComputeService,
        flavor_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Flavor, FlavorLookupError> {
        let mut entries = self.entries.lock().await;

        let needs_refresh = entries
            .get(flavor_name)
            .is_none_or(|entry| entry.is_stale(now));
        if needs_refresh {
            debug!("Refreshing flavor {}", flavor_name);
            let entry = Self::refresh(compute, flavor_name, now).await;
            entries.insert(flavor_name.to_string(), entry);
        }

        match entries.get(flavor_name) {
            Some(FlavorEntry { error: Some(err), .. }) => Err(err.clone()),
            Some(FlavorEntry { info: Some(info), .. }) => Ok(info.clone()),
            _ => Err(FlavorLookupError::Info(format!(
                "no information cached for flavor {}",
                flavor_name
            ))),
        }
    }

    async fn refresh(compute: &dyn ComputeService, flavor_name: &str, now: DateTime<Utc>) -> FlavorEntry {
        let flavor_id = match compute.get_flavor_id(flavor_name).await {
            Ok(id) => id,
            Err(e) => {
                return FlavorEntry {
                    info: None,
                    error: Some(FlavorLookupError::ResolveId(e.to_string())),
                    updated: now,
                };
            }
        };

        match compute.get_flavor(&flavor_id).await {
            Ok(info) => FlavorEntry {
                info: Some(info),
                error: None,
                updated: now,
            },
            Err(e) => FlavorEntry {
                info: None,
                error: Some(FlavorLookupError::Info(e.to_string())),
                updated: now,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openstack_client::MockOpenStackClient;

    fn mock_with_flavor() -> MockOpenStackClient {
        let mock = MockOpenStackClient::new();
        mock.add_flavor(Flavor {
            id: "flavor-1".to_string(),
            name: "m1.large".to_string(),
            vcpus: 4,
            ram: 8192,
            disk: 40,
        });
        mock
    }

    #[test]
    fn test_freshness_boundaries() {
        let now = Utc::now();
        let entry = |age: i64, failed: bool| FlavorEntry {
            info: None,
            error: failed.then(|| FlavorLookupError::ResolveId("x".to_string())),
            updated: now - TimeDelta::seconds(age),
        };

        let cases = [
            (0, false, false),
            (299, false, false),
            (300, false, true),
            (301, false, true),
            (0, true, false),
            (59, true, false),
            (60, true, true),
            (299, true, true),
        ];
        for (age, failed, stale) in cases {
            assert_eq!(
                entry(age, failed).is_stale(now),
                stale,
                "age {}s failed={}",
                age,
                failed
            );
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_lookup() {
        let mock = mock_with_flavor();
        let cache = FlavorCache::new();
        let now = Utc::now();

        let first = cache.get_at(&mock, "m1.large", now).await.unwrap();
        assert_eq!(first.vcpus, 4);
        assert_eq!(mock.call_count("get_flavor_id"), 1);
        assert_eq!(mock.call_count("get_flavor"), 1);

        let second = cache
            .get_at(&mock, "m1.large", now + TimeDelta::seconds(299))
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(mock.call_count("get_flavor_id"), 1);
        assert_eq!(mock.call_count("get_flavor"), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refreshed() {
        let mock = mock_with_flavor();
        let cache = FlavorCache::new();
        let now = Utc::now();

        cache.get_at(&mock, "m1.large", now).await.unwrap();
        cache
            .get_at(&mock, "m1.large", now + TimeDelta::seconds(300))
            .await
            .unwrap();

        assert_eq!(mock.call_count("get_flavor_id"), 2);
        assert_eq!(mock.call_count("get_flavor"), 2);
    }

    #[tokio::test]
    async fn test_failed_lookup_is_cached_until_retry_interval() {
        let mock = MockOpenStackClient::new();
        let cache = FlavorCache::new();
        let now = Utc::now();

        let err = cache.get_at(&mock, "missing", now).await.unwrap_err();
        assert!(matches!(err, FlavorLookupError::ResolveId(_)));
        assert!(err.to_string().starts_with("failed to resolve flavor ID"));
        // Info lookup never ran
        assert_eq!(mock.call_count("get_flavor"), 0);

        let cached = cache
            .get_at(&mock, "missing", now + TimeDelta::seconds(59))
            .await
            .unwrap_err();
        assert_eq!(cached, err);
        assert_eq!(mock.call_count("get_flavor_id"), 1);

        cache
            .get_at(&mock, "missing", now + TimeDelta::seconds(60))
            .await
            .unwrap_err();
        assert_eq!(mock.call_count("get_flavor_id"), 2);
    }

    #[tokio::test]
    async fn test_info_failure_is_reported() {
        let mock = mock_with_flavor();
        mock.fail("get_flavor", "flavor details unavailable");
        let cache = FlavorCache::new();

        let err = cache.get(&mock, "m1.large").await.unwrap_err();
        assert!(matches!(err, FlavorLookupError::Info(_)));
        assert!(err.to_string().contains("flavor details unavailable"));
    }
}
