//! Top-level retrieval orchestrator.
//!
//! A [`Retriever`] owns the pipeline, the cache and the circuit breaker. Every
//! call to [`Retriever::retrieve`] yields a [`RetrievalResult`]; failures show up
//! as `stage`, `fallback_triggered` and the metrics bag, never as an `Err`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheStats, CacheWriter, create_cache};
use crate::circuit::{CircuitBreaker, CircuitBreakerStats};
use crate::config::RetrieverConfig;
use crate::error::{ConfigError, PipelineError, RetrievalError};
use crate::fingerprint::result_cache_key;
use crate::metrics::{MetricsSnapshot, RetrievalMetrics};
use crate::pipeline::Pipeline;
use crate::reranker::Reranker;
use crate::rules::{RuleEngine, RuleInfo};
use crate::stage::{PreRankStage, ReRankStage, RecallStage, Stage, StageContext};
use crate::types::{
    Document, ResultMetrics, RetrievalRequest, RetrievalResult, StageMetrics, StageType,
};
use crate::vector_store::VectorStore;

const CIRCUIT_OPEN_REASON: &str = "circuit_breaker_open";

/// Runtime statistics for a retriever and its collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct RetrieverStats {
    pub circuit_breaker: CircuitBreakerStats,
    pub cache: CacheStats,
    pub pending_cache_writes: usize,
    pub dropped_cache_writes: u64,
    pub rules: Vec<RuleInfo>,
    pub reranker: HashMap<String, Value>,
    pub vector_store: HashMap<String, Value>,
    pub retrieval: MetricsSnapshot,
}

pub struct Retriever {
    config: RetrieverConfig,
    pipeline: Pipeline,
    recall: Arc<RecallStage>,
    rules: Arc<RuleEngine>,
    vector_store: Arc<dyn VectorStore>,
    reranker: Arc<dyn Reranker>,
    writer: CacheWriter,
    breaker: tokio::sync::Mutex<CircuitBreaker>,
    metrics: Mutex<RetrievalMetrics>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("pipeline", &self.pipeline)
            .field("rules", &self.rules)
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    /// Build a retriever with the cache backend named in `config.cache`.
    pub fn new(
        config: RetrieverConfig,
        vector_store: Arc<dyn VectorStore>,
        reranker: Arc<dyn Reranker>,
    ) -> Result<Self, ConfigError> {
        let cache = create_cache(&config.cache);
        Self::with_cache(config, vector_store, reranker, cache)
    }

    /// Build a retriever around an existing cache.
    pub fn with_cache(
        config: RetrieverConfig,
        vector_store: Arc<dyn VectorStore>,
        reranker: Arc<dyn Reranker>,
        cache: Arc<dyn Cache>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let rules = Arc::new(RuleEngine::from_config(&config.rule_engine)?);
        let writer = CacheWriter::new(cache, config.cache.write_concurrency);

        let recall = Arc::new(RecallStage::new(
            &config.recall,
            config.stages.recall,
            Arc::clone(&vector_store),
        ));
        let pre_rank =
            PreRankStage::new(&config.pre_rank, config.stages.pre_rank, Arc::clone(&rules));
        let re_rank = ReRankStage::new(
            &config.re_rank,
            config.stages.re_rank,
            Arc::clone(&reranker),
            writer.clone(),
        );
        let pipeline = Pipeline::new(vec![
            Arc::clone(&recall) as Arc<dyn Stage>,
            Arc::new(pre_rank),
            Arc::new(re_rank),
        ]);

        info!(
            stages = ?pipeline.stage_types(),
            rules = rules.len(),
            cache_writers = config.cache.write_concurrency,
            "Retriever initialized"
        );

        Ok(Self {
            breaker: tokio::sync::Mutex::new(CircuitBreaker::from_config(&config.circuit_breaker)),
            metrics: Mutex::new(RetrievalMetrics::new()),
            config,
            pipeline,
            recall,
            rules,
            vector_store,
            reranker,
            writer,
        })
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Run a retrieval request against the vector store.
    pub async fn retrieve(&self, request: RetrievalRequest) -> RetrievalResult {
        self.execute(request, Vec::new()).await
    }

    /// Run a request over caller-supplied candidates instead of a vector search.
    ///
    /// Recall passes the seed through unchanged. The result cache is bypassed
    /// because its key does not cover the seed.
    pub async fn retrieve_with_seed(
        &self,
        request: RetrievalRequest,
        seed: Vec<Document>,
    ) -> RetrievalResult {
        self.execute(request, seed).await
    }

    async fn execute(&self, request: RetrievalRequest, seed: Vec<Document>) -> RetrievalResult {
        let start = Instant::now();
        let top_k = request.top_k.filter(|k| *k > 0);
        let use_result_cache = request.use_cache && seed.is_empty();
        let ctx = StageContext::new(
            request.filters.clone(),
            request.use_cache,
            request.enable_stages,
        );

        info!(
            query = %request.query,
            top_k = ?top_k,
            use_cache = request.use_cache,
            "Retrieval started"
        );

        let permitted = self.breaker.lock().await.is_call_permitted();
        if !permitted {
            warn!("Circuit breaker open, skipping pipeline");
            let result = self
                .fallback(
                    &request.query,
                    top_k,
                    &ctx,
                    seed,
                    Vec::new(),
                    CIRCUIT_OPEN_REASON.to_string(),
                    start,
                )
                .await;
            return self.finish(result, false);
        }

        let cache_key = use_result_cache.then(|| {
            result_cache_key(
                &request.query,
                top_k,
                request.filters.as_ref(),
                request.enable_stages.as_ref(),
            )
        });

        if let Some(key) = &cache_key {
            if let Some(mut cached) = self.cached_result(key).await {
                debug!(key = &key[..12], "Result cache hit");
                cached.latency_ms = elapsed_ms(start);
                cached.cache_hit = true;
                return self.finish(cached, true);
            }
        }

        let deadline = self.config.circuit_breaker.request_timeout();
        let pipeline_start = Instant::now();
        let mut stage_metrics = Vec::new();
        let run = self
            .pipeline
            .run_recorded(&request.query, seed.clone(), &ctx, &mut stage_metrics);
        let timed = tokio::time::timeout(deadline, run).await;
        let outcome = match timed {
            Ok(outcome) => outcome,
            Err(_) => {
                self.record_stalled_stage(&mut stage_metrics, pipeline_start, seed.len());
                Err(PipelineError::DeadlineExceeded {
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        };

        match outcome {
            Ok((mut documents, stage)) => {
                self.breaker.lock().await.record_success();
                if let Some(k) = top_k {
                    documents.truncate(k);
                }

                let result = RetrievalResult {
                    query: request.query,
                    documents,
                    stage,
                    latency_ms: elapsed_ms(start),
                    cache_hit: false,
                    fallback_triggered: false,
                    metrics: ResultMetrics {
                        stages: stage_metrics,
                        ..Default::default()
                    },
                };

                if let Some(key) = cache_key {
                    if result.stage != StageType::Fallback && !result.documents.is_empty() {
                        self.store_result(key, &result);
                    }
                }
                self.finish(result, use_result_cache)
            }
            Err(e) => {
                warn!(error = %e, "Pipeline failed, falling back to recall only");
                self.breaker.lock().await.record_failure();
                let result = self
                    .fallback(
                        &request.query,
                        top_k,
                        &ctx,
                        seed,
                        stage_metrics,
                        e.to_string(),
                        start,
                    )
                    .await;
                self.finish(result, use_result_cache)
            }
        }
    }

    /// Append a failed record for the stage that was running when the deadline
    /// fired. Its latency is whatever the finished stages did not account for.
    fn record_stalled_stage(
        &self,
        metrics: &mut Vec<StageMetrics>,
        started: Instant,
        seed_len: usize,
    ) {
        let Some(stage) = self.pipeline.stage_at(metrics.len()) else {
            return;
        };
        let accounted: f64 = metrics.iter().map(|m| m.latency_ms).sum();
        let latency_ms = (elapsed_ms(started) - accounted).max(0.0);
        let input = metrics.last().map_or(seed_len, |m| m.output_count);
        warn!(stage = %stage, latency_ms, "Stage still running at request deadline");
        metrics.push(StageMetrics::failed(
            stage,
            latency_ms,
            input,
            0,
            "interrupted by request deadline",
        ));
    }

    async fn cached_result(&self, key: &str) -> Option<RetrievalResult> {
        let payload = match self.writer.cache().get(key).await {
            Ok(payload) => payload?,
            Err(e) => {
                warn!(error = %e, "Result cache lookup failed");
                return None;
            }
        };
        match serde_json::from_str(&payload) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, "Discarding malformed cached result");
                None
            }
        }
    }

    fn store_result(&self, key: String, result: &RetrievalResult) {
        match serde_json::to_string(result) {
            Ok(payload) => {
                let ttl = Some(self.config.cache.result_ttl());
                let _ = self.writer.submit(key, payload, ttl);
            }
            Err(e) => warn!(error = %e, "Failed to serialize retrieval result"),
        }
    }

    /// Recall-only path. Never fails: a failing recall yields an empty result
    /// carrying both error reasons.
    ///
    /// `stages` holds whatever the abandoned pipeline run recorded; the fallback
    /// record is appended after it.
    #[allow(clippy::too_many_arguments)]
    async fn fallback(
        &self,
        query: &str,
        top_k: Option<usize>,
        ctx: &StageContext,
        seed: Vec<Document>,
        mut stages: Vec<StageMetrics>,
        reason: String,
        start: Instant,
    ) -> RetrievalResult {
        let deadline = self.config.circuit_breaker.request_timeout();
        let recall_start = Instant::now();
        let call = self.recall.execute(query, seed, ctx);
        let recalled = match tokio::time::timeout(deadline, call).await {
            Ok(Ok(output)) => Ok(output.documents),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(PipelineError::DeadlineExceeded {
                timeout_ms: deadline.as_millis() as u64,
            }
            .to_string()),
        };
        let recall_latency = elapsed_ms(recall_start);

        let (documents, stage_metrics, error) = match recalled {
            Ok(mut documents) => {
                if let Some(k) = top_k {
                    documents.truncate(k);
                }
                let m = StageMetrics::succeeded(
                    StageType::Fallback,
                    recall_latency,
                    0,
                    documents.len(),
                );
                (documents, m, None)
            }
            Err(fallback_error) => {
                warn!(reason = %reason, error = %fallback_error, "Fallback recall failed");
                let m = StageMetrics::failed(
                    StageType::Fallback,
                    recall_latency,
                    0,
                    0,
                    fallback_error.clone(),
                );
                let error = format!("{reason}; fallback_error: {fallback_error}");
                (Vec::new(), m, Some(error))
            }
        };

        stages.push(stage_metrics);

        RetrievalResult {
            query: query.to_string(),
            documents,
            stage: StageType::Fallback,
            latency_ms: elapsed_ms(start),
            cache_hit: false,
            fallback_triggered: true,
            metrics: ResultMetrics {
                stages,
                fallback_reason: Some(reason),
                error,
            },
        }
    }

    fn finish(&self, result: RetrievalResult, cache_checked: bool) -> RetrievalResult {
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.record(&result, cache_checked);
        }
        info!(
            stage = %result.stage,
            documents = result.documents.len(),
            latency_ms = result.latency_ms,
            cache_hit = result.cache_hit,
            fallback = result.fallback_triggered,
            "Retrieval finished"
        );
        result
    }

    /// Index documents in the vector store.
    pub async fn add_documents(&self, documents: Vec<Document>) -> Result<usize, RetrievalError> {
        let added = self.vector_store.add_documents(documents).await?;
        info!(added, "Documents added");
        Ok(added)
    }

    /// Remove documents from the vector store.
    pub async fn delete_documents(&self, ids: &[String]) -> Result<usize, RetrievalError> {
        let removed = self.vector_store.delete_documents(ids).await?;
        info!(requested = ids.len(), removed, "Documents deleted");
        Ok(removed)
    }

    /// Wait for every background cache write submitted so far.
    pub async fn flush_pending_writes(&self) {
        self.writer.flush().await;
    }

    pub async fn stats(&self) -> RetrieverStats {
        let circuit_breaker = self.breaker.lock().await.stats();
        let retrieval = match self.metrics.lock() {
            Ok(metrics) => metrics.snapshot(),
            Err(poisoned) => poisoned.into_inner().snapshot(),
        };
        RetrieverStats {
            circuit_breaker,
            cache: self.writer.cache().stats().await,
            pending_cache_writes: self.writer.pending(),
            dropped_cache_writes: self.writer.dropped(),
            rules: self.rules.rule_info(),
            reranker: self.reranker.model_info(),
            vector_store: self.vector_store.stats().await,
            retrieval,
        }
    }

    /// Flush pending cache writes and close every collaborator.
    ///
    /// All collaborators are closed even if one fails; the first error is returned.
    pub async fn close(&self) -> Result<(), RetrievalError> {
        self.writer.flush().await;

        let cache = self
            .writer
            .cache()
            .close()
            .await
            .map_err(RetrievalError::from);
        let store = self
            .vector_store
            .close()
            .await
            .map_err(RetrievalError::from);
        let reranker = self.reranker.close().await.map_err(RetrievalError::from);
        info!("Retriever closed");

        cache.and(store).and(reranker)
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
