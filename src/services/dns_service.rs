//! DNS resolution for domain records.
//!
//! Lookups run per record type and fail independently: a type that cannot
//! be resolved contributes an empty list, and a totally unresolvable
//! domain yields three empty lists. Resolution never surfaces an error to
//! the caller; a domain with no records is a valid domain.

use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::config::Config;

/// Resolved record sets for one domain name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsRecords {
    pub ns_records: Vec<String>,
    pub a_records: Vec<String>,
    pub aaaa_records: Vec<String>,
}

/// Resolver seam so tests and offline environments can substitute a stub.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Look up NS, A and AAAA records for a domain name.
    async fn resolve(&self, domain: &str) -> DnsRecords;
}

/// Production resolver backed by hickory.
pub struct HickoryDnsResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryDnsResolver {
    /// Build a resolver using the default public configuration with the
    /// configured per-query timeout.
    pub fn new(config: &Config) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.dns_timeout_secs);
        opts.attempts = 2;

        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
        }
    }
}

#[async_trait]
impl DnsResolver for HickoryDnsResolver {
    async fn resolve(&self, domain: &str) -> DnsRecords {
        let ns_records = match self.resolver.ns_lookup(domain).await {
            Ok(lookup) => lookup.iter().map(|r| r.to_string()).collect(),
            Err(e) => {
                tracing::debug!(domain, error = %e, "NS lookup failed");
                Vec::new()
            }
        };

        let a_records = match self.resolver.ipv4_lookup(domain).await {
            Ok(lookup) => lookup.iter().map(|r| r.to_string()).collect(),
            Err(e) => {
                tracing::debug!(domain, error = %e, "A lookup failed");
                Vec::new()
            }
        };

        let aaaa_records = match self.resolver.ipv6_lookup(domain).await {
            Ok(lookup) => lookup.iter().map(|r| r.to_string()).collect(),
            Err(e) => {
                tracing::debug!(domain, error = %e, "AAAA lookup failed");
                Vec::new()
            }
        };

        DnsRecords {
            ns_records,
            a_records,
            aaaa_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct FixedResolver(DnsRecords);

    #[async_trait]
    impl DnsResolver for FixedResolver {
        async fn resolve(&self, _domain: &str) -> DnsRecords {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_resolver_seam_is_object_safe() {
        let resolver: Arc<dyn DnsResolver> = Arc::new(FixedResolver(DnsRecords {
            ns_records: vec!["ns1.example.com.".into()],
            a_records: vec!["192.0.2.1".into()],
            aaaa_records: vec![],
        }));
        let records = resolver.resolve("example.com").await;
        assert_eq!(records.ns_records, vec!["ns1.example.com."]);
        assert_eq!(records.a_records, vec!["192.0.2.1"]);
        assert!(records.aaaa_records.is_empty());
    }

    #[tokio::test]
    async fn test_default_records_are_three_empty_lists() {
        let records = DnsRecords::default();
        assert!(records.ns_records.is_empty());
        assert!(records.a_records.is_empty());
        assert!(records.aaaa_records.is_empty());
    }
}
