//! # Shared indices
//!
//! Two lookup tables tie the pipeline together:
//!
//! - [`DomainIndex`]: domain -> ordered, duplicate-free URL list. Built once by
//!   the ingestor through a [`DomainIndexBuilder`] and immutable afterwards, so
//!   it is shared behind an `Arc` without any locking.
//! - [`ReverseIndex`]: IP -> domains, filled incrementally by the resolution
//!   correlator while the scan correlator reads it from another task. It is the
//!   only structure with a concurrent read/write profile and is guarded by a
//!   `parking_lot::RwLock`.
use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
};

use parking_lot::RwLock;

/// URLs grouped by hostname, in first-occurrence order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DomainIndex {
    order: Vec<String>,
    urls: HashMap<String, Vec<String>>,
}

impl DomainIndex {
    pub fn builder() -> DomainIndexBuilder {
        DomainIndexBuilder::default()
    }

    /// Number of distinct domains.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// URLs recorded under `domain`, in insertion order.
    pub fn urls(&self, domain: &str) -> Option<&[String]> {
        self.urls.get(domain).map(Vec::as_slice)
    }

    /// Domains in the order they were first observed.
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// The newline-delimited domain block handed to the resolver.
    pub fn domain_list(&self) -> String {
        let capacity = self.order.iter().map(|d| d.len() + 1).sum();
        self.order
            .iter()
            .fold(String::with_capacity(capacity), |mut block, domain| {
                block.push_str(domain);
                block.push('\n');
                block
            })
    }
}

#[derive(Debug, Default)]
struct DomainUrls {
    urls: Vec<String>,
    seen: HashSet<String>,
}

/// Mutable form of [`DomainIndex`], used only during ingestion.
#[derive(Debug, Default)]
pub struct DomainIndexBuilder {
    order: Vec<String>,
    entries: HashMap<String, DomainUrls>,
}

impl DomainIndexBuilder {
    /// Records `url` under `domain`.
    ///
    /// Returns `true` when `domain` had not been seen before. A URL string
    /// already present under the domain is not stored again.
    pub fn insert(&mut self, domain: String, url: String) -> bool {
        let is_new = !self.entries.contains_key(&domain);
        if is_new {
            self.order.push(domain.clone());
        }

        let entry = self.entries.entry(domain).or_default();
        if !entry.seen.contains(&url) {
            entry.seen.insert(url.clone());
            entry.urls.push(url);
        }

        is_new
    }

    /// Freezes the builder into a read-only [`DomainIndex`].
    pub fn build(self) -> DomainIndex {
        let urls = self
            .entries
            .into_iter()
            .map(|(domain, entry)| (domain, entry.urls))
            .collect();

        DomainIndex {
            order: self.order,
            urls,
        }
    }
}

/// IP -> domains mapping built from resolver output.
///
/// Membership is not deduplicated: recording the same `(ip, domain)` pair
/// twice stores the domain twice. Consumers dedup at domain granularity.
#[derive(Debug, Default)]
pub struct ReverseIndex {
    inner: RwLock<HashMap<IpAddr, Vec<String>>>,
}

impl ReverseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `domain` to the list for `ip`.
    ///
    /// Returns `true` when `ip` was not present before this call.
    pub fn record(&self, ip: IpAddr, domain: String) -> bool {
        let mut map = self.inner.write();
        match map.get_mut(&ip) {
            Some(domains) => {
                domains.push(domain);
                false
            }
            None => {
                map.insert(ip, vec![domain]);
                true
            }
        }
    }

    /// Snapshot of the domains known for `ip`; empty when the IP is unknown.
    pub fn domains(&self, ip: &IpAddr) -> Vec<String> {
        self.inner.read().get(ip).cloned().unwrap_or_default()
    }

    /// Number of distinct IPs recorded so far.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_domain_index_keeps_first_occurrence_order() {
        let mut builder = DomainIndex::builder();
        assert!(builder.insert("b.com".into(), "http://b.com/1".into()));
        assert!(builder.insert("a.com".into(), "http://a.com/2".into()));
        assert!(!builder.insert("b.com".into(), "http://b.com/3".into()));
        assert!(!builder.insert("b.com".into(), "http://b.com/1".into()));

        let index = builder.build();
        assert_eq!(index.len(), 2);
        assert_eq!(index.domains().collect::<Vec<_>>(), vec!["b.com", "a.com"]);
        assert_eq!(
            index.urls("b.com").unwrap(),
            &["http://b.com/1".to_string(), "http://b.com/3".to_string()]
        );
        assert_eq!(index.urls("c.com"), None);
        assert_eq!(index.domain_list(), "b.com\na.com\n");
    }

    #[test]
    fn test_domain_index_empty_list() {
        let index = DomainIndex::builder().build();
        assert!(index.is_empty());
        assert_eq!(index.domain_list(), "");
    }

    #[test]
    fn test_reverse_index_does_not_dedup_domains() {
        let index = ReverseIndex::new();
        let ip: IpAddr = "1.1.1.1".parse().unwrap();

        assert!(index.record(ip, "a.com".into()));
        assert!(!index.record(ip, "a.com".into()));
        assert!(!index.record(ip, "b.com".into()));

        assert_eq!(index.domains(&ip), vec!["a.com", "a.com", "b.com"]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_reverse_index_unknown_ip_is_empty() {
        let index = ReverseIndex::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(index.domains(&ip).is_empty());
        assert!(index.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reverse_index_concurrent_writer_and_reader() {
        let index = Arc::new(ReverseIndex::new());

        let writer = {
            let index = index.clone();
            tokio::spawn(async move {
                for i in 0..2_000u32 {
                    let ip = IpAddr::from(i.to_be_bytes());
                    index.record(ip, format!("d{i}.com"));
                }
            })
        };

        let reader = {
            let index = index.clone();
            tokio::spawn(async move {
                let mut seen = 0;
                for i in 0..2_000u32 {
                    let ip = IpAddr::from(i.to_be_bytes());
                    seen += index.domains(&ip).len();
                }
                seen
            })
        };

        writer.await.unwrap();
        let seen = reader.await.unwrap();
        assert!(seen <= 2_000);
        assert_eq!(index.len(), 2_000);
    }
}
