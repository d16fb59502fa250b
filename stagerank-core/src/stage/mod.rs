//! Pipeline stages and the shared run contract.
//!
//! A [`Stage`] only implements [`Stage::execute`]. [`run`] wraps every call with
//! timing, enable checks and failure capture so that a failing stage hands the
//! pipeline its input back instead of an error.

pub mod pre_rank;
pub mod re_rank;
pub mod recall;

pub use pre_rank::PreRankStage;
pub use re_rank::ReRankStage;
pub use recall::RecallStage;

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::StageError;
use crate::types::{Document, Filters, StageMetrics, StageToggles, StageType};

/// Per-request inputs every stage can see.
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    pub filters: Option<Filters>,
    pub use_cache: bool,
    /// Per-request enable overrides; unset entries use the stage's configuration.
    pub overrides: StageToggles,
}

impl StageContext {
    pub fn new(filters: Option<Filters>, use_cache: bool, overrides: Option<StageToggles>) -> Self {
        Self {
            filters,
            use_cache,
            overrides: overrides.unwrap_or_default(),
        }
    }
}

/// Documents produced by a stage.
///
/// `degraded` is set when a collaborator failed and the stage substituted a
/// best-effort result; the documents are still usable.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub documents: Vec<Document>,
    pub degraded: Option<String>,
}

impl StageOutput {
    pub fn ok(documents: Vec<Document>) -> Self {
        Self {
            documents,
            degraded: None,
        }
    }

    pub fn degraded(documents: Vec<Document>, reason: impl Into<String>) -> Self {
        Self {
            documents,
            degraded: Some(reason.into()),
        }
    }
}

/// One step of the retrieval pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn stage_type(&self) -> StageType;

    /// Configured enable flag, before per-request overrides.
    fn is_enabled(&self) -> bool;

    async fn execute(
        &self,
        query: &str,
        documents: Vec<Document>,
        ctx: &StageContext,
    ) -> Result<StageOutput, StageError>;
}

/// Outcome of [`run`].
#[derive(Debug, Clone)]
pub struct StageRun {
    pub documents: Vec<Document>,
    pub metrics: StageMetrics,
    /// False when the stage was disabled and skipped.
    pub executed: bool,
}

impl StageRun {
    pub fn succeeded(&self) -> bool {
        self.executed && self.metrics.success
    }
}

/// Whether `stage` runs for this request.
pub fn is_active(stage: &dyn Stage, ctx: &StageContext) -> bool {
    ctx.overrides
        .get(stage.stage_type())
        .unwrap_or_else(|| stage.is_enabled())
}

/// Execute a stage with timing and failure capture.
///
/// - disabled: input returned unchanged, zero-latency success metric
/// - error: input returned unchanged, `success = false`, `output_count = 0`
/// - degraded: degraded output returned, `success = false`
pub async fn run(
    stage: &dyn Stage,
    query: &str,
    documents: Vec<Document>,
    ctx: &StageContext,
) -> StageRun {
    let stage_type = stage.stage_type();
    let input_count = documents.len();

    if !is_active(stage, ctx) {
        debug!(stage = %stage_type, "Stage disabled, passing documents through");
        return StageRun {
            documents,
            metrics: StageMetrics::disabled(stage_type, input_count),
            executed: false,
        };
    }

    let last_good = documents.clone();
    let start = Instant::now();
    let result = stage.execute(query, documents, ctx).await;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    match result {
        Ok(StageOutput {
            documents,
            degraded: None,
        }) => {
            info!(
                stage = %stage_type,
                input = input_count,
                output = documents.len(),
                latency_ms,
                "Stage completed"
            );
            let metrics =
                StageMetrics::succeeded(stage_type, latency_ms, input_count, documents.len());
            StageRun {
                documents,
                metrics,
                executed: true,
            }
        }
        Ok(StageOutput {
            documents,
            degraded: Some(reason),
        }) => {
            warn!(stage = %stage_type, reason = %reason, latency_ms, "Stage degraded");
            let metrics = StageMetrics::failed(
                stage_type,
                latency_ms,
                input_count,
                documents.len(),
                reason,
            );
            StageRun {
                documents,
                metrics,
                executed: true,
            }
        }
        Err(e) => {
            warn!(stage = %stage_type, error = %e, latency_ms, "Stage failed");
            StageRun {
                documents: last_good,
                metrics: StageMetrics::failed(
                    stage_type,
                    latency_ms,
                    input_count,
                    0,
                    e.to_string(),
                ),
                executed: true,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Configurable stage for pipeline tests.
    pub struct ScriptedStage {
        pub stage_type: StageType,
        pub enabled: bool,
        pub behavior: Behavior,
    }

    pub enum Behavior {
        /// Reverse the input.
        Reverse,
        Fail,
        /// Drop the last document and report degradation.
        Degrade,
        /// Never finish within a test's lifetime.
        Stall,
    }

    impl ScriptedStage {
        pub fn new(stage_type: StageType, behavior: Behavior) -> Self {
            Self {
                stage_type,
                enabled: true,
                behavior,
            }
        }
    }

    #[async_trait]
    impl Stage for ScriptedStage {
        fn stage_type(&self) -> StageType {
            self.stage_type
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn execute(
            &self,
            _query: &str,
            mut documents: Vec<Document>,
            _ctx: &StageContext,
        ) -> Result<StageOutput, StageError> {
            match self.behavior {
                Behavior::Reverse => {
                    documents.reverse();
                    Ok(StageOutput::ok(documents))
                }
                Behavior::Fail => Err(StageError::Other {
                    stage: self.stage_type.to_string(),
                    message: "scripted failure".into(),
                }),
                Behavior::Degrade => {
                    documents.pop();
                    Ok(StageOutput::degraded(documents, "collaborator down"))
                }
                Behavior::Stall => {
                    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                    Ok(StageOutput::ok(documents))
                }
            }
        }
    }

    pub fn docs(ids: &[&str]) -> Vec<Document> {
        ids.iter().map(|id| Document::new(*id, "")).collect()
    }

    pub fn ids(documents: &[Document]) -> Vec<&str> {
        documents.iter().map(|d| d.id.as_str()).collect()
    }
}
