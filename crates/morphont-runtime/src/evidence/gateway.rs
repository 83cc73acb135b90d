//! Uniform access to evidence providers.
//!
//! The gateway is what the orchestrator talks to. For every backend call it
//! waits out the backend's minimum request interval, applies the request
//! timeout and retries transient faults with bounded exponential backoff.
//! Fetched documents are memoized in a [`DocumentCache`].

use backon::Retryable;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{EvidenceProvider, EvidenceRegistry, ProviderError, ProviderFault, RawDocument};
use crate::cache::{DocumentCache, DocumentKey};
use crate::records::{Query, Source};
use crate::resilience::RetryPolicy;

type Pacer = Arc<tokio::sync::Mutex<Option<Instant>>>;

pub struct EvidenceGateway {
    registry: EvidenceRegistry,
    retry: RetryPolicy,
    documents: DocumentCache,
    pacers: Mutex<HashMap<Source, Pacer>>,
}

impl EvidenceGateway {
    pub fn new(registry: EvidenceRegistry, retry: RetryPolicy, documents: DocumentCache) -> Self {
        Self {
            registry,
            retry,
            documents,
            pacers: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &EvidenceRegistry {
        &self.registry
    }

    pub fn documents(&self) -> &DocumentCache {
        &self.documents
    }

    /// Search a backend and fetch the documents it points at, in hit order.
    pub async fn gather(&self, query: &Query) -> Result<Vec<RawDocument>, ProviderError> {
        let provider = self.registry.get(&query.source)?;

        let hits = self
            .call(query, &provider, || provider.search(query))
            .await?;

        let mut seen = BTreeSet::new();
        let ids: Vec<String> = hits
            .into_iter()
            .map(|hit| hit.id)
            .filter(|id| seen.insert(id.clone()))
            .take(query.max_results as usize)
            .collect();

        if ids.is_empty() {
            tracing::info!(keyword = %query.keyword, source = %query.source, "no hits");
            return Ok(Vec::new());
        }

        let mut found: HashMap<String, RawDocument> = HashMap::new();
        let mut missing = Vec::new();
        for id in &ids {
            match self.documents.get(&DocumentKey::new(&query.source, id.clone())).await {
                Some(doc) => {
                    found.insert(id.clone(), doc);
                }
                None => missing.push(id.clone()),
            }
        }

        if !missing.is_empty() {
            let fetched = self
                .call(query, &provider, || provider.fetch(&missing))
                .await?;
            for doc in fetched {
                self.documents.insert(doc.clone()).await;
                found.insert(doc.id.clone(), doc);
            }
        }

        tracing::debug!(
            keyword = %query.keyword,
            source = %query.source,
            hits = ids.len(),
            cached = ids.len() - missing.len(),
            "evidence gathered"
        );

        Ok(ids.into_iter().filter_map(|id| found.remove(&id)).collect())
    }

    /// One backend call with pacing, timeout and retry.
    async fn call<T, F, Fut>(
        &self,
        query: &Query,
        provider: &Arc<dyn EvidenceProvider>,
        op: F,
    ) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderFault>>,
    {
        let attempts = AtomicU32::new(0);
        let timeout = provider.request_timeout();
        let interval = provider.min_interval();
        let pacer = self.pacer(&query.source);

        let result = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            pace(&pacer, interval).await;
            match tokio::time::timeout(timeout, op()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderFault::Timeout(timeout)),
            }
        })
        .retry(self.retry.backoff())
        .when(ProviderFault::is_transient)
        .notify(|fault: &ProviderFault, delay: Duration| {
            tracing::warn!(
                keyword = %query.keyword,
                source = %query.source,
                attempt = attempts.load(Ordering::SeqCst),
                error = %fault,
                delay = ?delay,
                "evidence call failed, retrying"
            );
        })
        .await;

        result.map_err(|fault| {
            let attempts = attempts.load(Ordering::SeqCst);
            tracing::warn!(
                keyword = %query.keyword,
                source = %query.source,
                attempts,
                error = %fault,
                "evidence call failed"
            );
            ProviderError::Query {
                query: Box::new(query.clone()),
                attempts,
                fault,
            }
        })
    }

    fn pacer(&self, source: &Source) -> Pacer {
        self.pacers
            .lock()
            .entry(source.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }
}

/// Wait until `interval` has passed since the previous call through `pacer`.
async fn pace(pacer: &Pacer, interval: Duration) {
    if interval.is_zero() {
        return;
    }
    let mut last = pacer.lock().await;
    if let Some(previous) = *last {
        let ready_at = previous + interval;
        if ready_at > Instant::now() {
            tokio::time::sleep_until(ready_at).await;
        }
    }
    *last = Some(Instant::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{RawHit, StaticProvider};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Fails the first `failures` searches with `fault`.
    struct FlakyProvider {
        fault: ProviderFault,
        failures: usize,
        searches: AtomicUsize,
        fetches: AtomicUsize,
        interval: Duration,
    }

    impl FlakyProvider {
        fn new(fault: ProviderFault, failures: usize) -> Self {
            Self {
                fault,
                failures,
                searches: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
                interval: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl EvidenceProvider for FlakyProvider {
        fn source(&self) -> Source {
            Source::Pubmed
        }

        async fn search(&self, _query: &Query) -> Result<Vec<RawHit>, ProviderFault> {
            let n = self.searches.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(self.fault.clone());
            }
            Ok(vec![
                RawHit { id: "1".into(), title: "one".into() },
                RawHit { id: "2".into(), title: "two".into() },
                RawHit { id: "1".into(), title: "one again".into() },
            ])
        }

        async fn fetch(&self, ids: &[String]) -> Result<Vec<RawDocument>, ProviderFault> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(ids
                .iter()
                .map(|id| RawDocument {
                    id: id.clone(),
                    source: Source::Pubmed,
                    title: format!("doc {}", id),
                    url: format!("https://pubmed.ncbi.nlm.nih.gov/{}/", id),
                    published: None,
                    license: None,
                    snippet: String::new(),
                    payload: serde_json::Value::Null,
                })
                .collect())
        }

        fn min_interval(&self) -> Duration {
            self.interval
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default().with_delays(Duration::from_millis(1), Duration::from_millis(5))
    }

    fn gateway(provider: Arc<FlakyProvider>) -> EvidenceGateway {
        EvidenceGateway::new(
            EvidenceRegistry::new().with(provider),
            fast_retry(),
            DocumentCache::default(),
        )
    }

    #[tokio::test]
    async fn test_transient_faults_are_retried() {
        let provider = Arc::new(FlakyProvider::new(ProviderFault::Network("reset".into()), 2));
        let docs = gateway(provider.clone())
            .gather(&Query::new("dcis", Source::Pubmed))
            .await
            .unwrap();

        assert_eq!(provider.searches.load(Ordering::SeqCst), 3);
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let provider = Arc::new(FlakyProvider::new(ProviderFault::Network("reset".into()), 10));
        let err = gateway(provider.clone())
            .gather(&Query::new("dcis", Source::Pubmed))
            .await
            .unwrap_err();

        assert_eq!(provider.searches.load(Ordering::SeqCst), 3);
        match err {
            ProviderError::Query { query, attempts, fault } => {
                assert_eq!(query.keyword, "dcis");
                assert_eq!(attempts, 3);
                assert!(matches!(fault, ProviderFault::Network(_)));
            }
            other => panic!("Expected Query error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_transient_fault_fails_immediately() {
        let provider = Arc::new(FlakyProvider::new(ProviderFault::Auth("bad key".into()), 10));
        let err = gateway(provider.clone())
            .gather(&Query::new("dcis", Source::Pubmed))
            .await
            .unwrap_err();

        assert_eq!(provider.searches.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ProviderError::Query { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let provider = Arc::new(FlakyProvider::new(ProviderFault::Network("x".into()), 0));
        let err = gateway(provider)
            .gather(&Query::new("dcis", Source::Crossref))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownSource(Source::Crossref)));
    }

    #[tokio::test]
    async fn test_fetched_documents_are_cached() {
        let provider = Arc::new(FlakyProvider::new(ProviderFault::Network("x".into()), 0));
        let gateway = gateway(provider.clone());

        gateway.gather(&Query::new("dcis", Source::Pubmed)).await.unwrap();
        gateway.gather(&Query::new("dcis", Source::Pubmed)).await.unwrap();

        assert_eq!(provider.searches.load(Ordering::SeqCst), 2);
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_paced() {
        let mut flaky = FlakyProvider::new(ProviderFault::Network("x".into()), 0);
        flaky.interval = Duration::from_millis(340);
        let gateway = gateway(Arc::new(flaky));

        let started = Instant::now();
        gateway.gather(&Query::new("a", Source::Pubmed)).await.unwrap();
        gateway.gather(&Query::new("b", Source::Pubmed)).await.unwrap();

        // search, fetch, search (fetch is served from cache): two waits.
        assert!(started.elapsed() >= Duration::from_millis(680));
    }

    #[tokio::test]
    async fn test_zero_hits_is_not_an_error() {
        let registry = EvidenceRegistry::new().with(Arc::new(StaticProvider::new(Source::Pubmed, vec![])));
        let gateway = EvidenceGateway::new(registry, fast_retry(), DocumentCache::default());
        let docs = gateway.gather(&Query::new("nothing", Source::Pubmed)).await.unwrap();
        assert!(docs.is_empty());
    }
}
