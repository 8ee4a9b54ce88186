//! Per-worker state.
//!
//! Each worker owns one [`WorkerContext`]. The analysis client inside it is
//! built on first use and reused for every later episode that worker
//! handles. Contexts are never shared between workers.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::GeminiConfig;
use crate::error::AnalysisError;
use crate::llm::{AnalysisService, GeminiClient};

/// Builds an analysis client. Called at most once per worker on success.
pub type ServiceFactory =
    Arc<dyn Fn() -> Result<Box<dyn AnalysisService>, AnalysisError> + Send + Sync>;

/// Wraps a closure as a [`ServiceFactory`].
pub fn service_factory<F>(build: F) -> ServiceFactory
where
    F: Fn() -> Result<Box<dyn AnalysisService>, AnalysisError> + Send + Sync + 'static,
{
    Arc::new(build)
}

/// Factory producing [`GeminiClient`]s keyed from the environment.
pub fn gemini_factory(config: &GeminiConfig) -> ServiceFactory {
    let model = config.model_name.clone();
    let api_base = config.api_base.clone();
    service_factory(move || {
        let client = GeminiClient::from_env(model.clone(), api_base.as_deref())?;
        Ok(Box::new(client) as Box<dyn AnalysisService>)
    })
}

/// State owned by a single worker for its whole lifetime.
pub struct WorkerContext {
    worker_id: String,
    factory: ServiceFactory,
    service: Option<Box<dyn AnalysisService>>,
    episodes_handled: usize,
}

impl WorkerContext {
    pub fn new(worker_id: impl Into<String>, factory: ServiceFactory) -> Self {
        Self {
            worker_id: worker_id.into(),
            factory,
            service: None,
            episodes_handled: 0,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Number of episodes this worker has started.
    pub fn episodes_handled(&self) -> usize {
        self.episodes_handled
    }

    pub(crate) fn begin_episode(&mut self) {
        self.episodes_handled += 1;
    }

    /// Returns true once the analysis client has been built.
    pub fn has_service(&self) -> bool {
        self.service.is_some()
    }

    /// Returns the worker's analysis client, building it on first call.
    ///
    /// A failed build is not cached; the next call tries again.
    pub fn service(&mut self) -> Result<&dyn AnalysisService, AnalysisError> {
        let service = match self.service.take() {
            Some(service) => {
                debug!(worker_id = %self.worker_id, "Reusing analysis client");
                service
            }
            None => {
                let service = (self.factory)()?;
                info!(worker_id = %self.worker_id, "Analysis client initialized");
                service
            }
        };
        Ok(&**self.service.insert(service))
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("worker_id", &self.worker_id)
            .field("has_service", &self.service.is_some())
            .field("episodes_handled", &self.episodes_handled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoService;

    #[async_trait]
    impl AnalysisService for EchoService {
        async fn analyze_episode(&self, _video: &Path, prompt: &str) -> Result<String, AnalysisError> {
            Ok(prompt.to_string())
        }
    }

    #[test]
    fn test_service_built_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let factory = service_factory(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoService) as Box<dyn AnalysisService>)
        });
        let mut ctx = WorkerContext::new("worker-0", factory);

        assert!(!ctx.has_service());
        ctx.service().unwrap();
        ctx.service().unwrap();
        ctx.service().unwrap();

        assert!(ctx.has_service());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_build_not_cached() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let factory = service_factory(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AnalysisError::MissingApiKey)
        });
        let mut ctx = WorkerContext::new("worker-0", factory);

        assert!(matches!(ctx.service(), Err(AnalysisError::MissingApiKey)));
        assert!(ctx.service().is_err());
        assert!(!ctx.has_service());
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_contexts_do_not_share_clients() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let factory = service_factory(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoService) as Box<dyn AnalysisService>)
        });

        let mut a = WorkerContext::new("worker-0", Arc::clone(&factory));
        let mut b = WorkerContext::new("worker-1", factory);
        a.service().unwrap();
        b.service().unwrap();
        a.service().unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }
}
