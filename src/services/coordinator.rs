//! Batch coordinator
//!
//! Drives a decoded batch through reference resolution and dispatch, in
//! either independent or transactional mode.
//!
//! Independent mode isolates failures: every item gets its own response and
//! each success is final as soon as its handler returns. Transactional mode
//! opens one unit-of-work for the whole call, stops at the first failure and
//! rolls back, or commits once every item has succeeded.

use crate::api::{ApiResponse, InvocationContext};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{BatchRequest, BatchResponse};
use crate::services::dispatcher::Dispatcher;
use crate::services::resolver::ReferenceResolver;
use crate::storage::{TransactionId, UnitOfWork};
use crate::utils::error::{normalize, ErrorInfo, ItemFailure};
use crate::utils::logging::request_summary;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Execution mode of one batch call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Failures are isolated per item
    Independent,
    /// All items commit or roll back together
    Transactional,
}

impl From<bool> for ExecutionMode {
    fn from(enclosing_transaction: bool) -> Self {
        if enclosing_transaction {
            ExecutionMode::Transactional
        } else {
            ExecutionMode::Independent
        }
    }
}

/// Lifecycle of one batch call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Running,
    /// Independent batch processed to the end
    Completed,
    /// Transactional batch committed
    Committed,
    /// Transactional batch rolled back, or its unit-of-work failed
    RolledBack,
}

/// Lifecycle of one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Queued,
    Resolved,
    Dispatched,
    Succeeded,
    Failed,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemState::Queued => "queued",
            ItemState::Resolved => "resolved",
            ItemState::Dispatched => "dispatched",
            ItemState::Succeeded => "succeeded",
            ItemState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of one batch call
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub responses: Vec<BatchResponse>,
    pub state: BatchState,
}

/// An open unit-of-work that must be finalized exactly once
///
/// `commit` and `rollback` consume the guard, so a transaction can never be
/// finalized twice.
struct TransactionGuard<'a> {
    unit_of_work: &'a dyn UnitOfWork,
    tx: TransactionId,
}

impl<'a> TransactionGuard<'a> {
    async fn begin(unit_of_work: &'a dyn UnitOfWork) -> Result<TransactionGuard<'a>, ItemFailure> {
        let tx = unit_of_work.begin().await.map_err(|e| ItemFailure::UnitOfWork(e.to_string()))?;
        Ok(Self { unit_of_work, tx })
    }

    fn id(&self) -> TransactionId {
        self.tx
    }

    async fn commit(self) -> Result<(), ItemFailure> {
        self.unit_of_work
            .commit(self.tx)
            .await
            .map_err(|e| ItemFailure::UnitOfWork(e.to_string()))
    }

    async fn rollback(self) {
        if let Err(e) = self.unit_of_work.rollback(self.tx).await {
            error!("Rollback of {} failed: {}", self.tx, e);
        }
    }
}

/// Per-call bookkeeping: responses seen so far, keyed by requestId
#[derive(Default)]
struct BatchRun {
    produced: HashMap<i64, BatchResponse>,
}

impl BatchRun {
    fn record(&mut self, response: &BatchResponse) {
        if let Some(id) = response.request_id {
            self.produced.entry(id).or_insert_with(|| response.clone());
        }
    }
}

/// Executes batches against the internal API
pub struct BatchCoordinator {
    dispatcher: Arc<Dispatcher>,
    unit_of_work: Arc<dyn UnitOfWork>,
    resolver: ReferenceResolver,
}

impl fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

fn success_response(request_id: i64, response: ApiResponse) -> BatchResponse {
    BatchResponse {
        request_id: Some(request_id),
        status_code: response.status.unwrap_or(200),
        headers: response.headers,
        body: response.body,
    }
}

fn error_response(request_id: Option<i64>, info: &ErrorInfo) -> BatchResponse {
    BatchResponse {
        request_id,
        status_code: info.status_code,
        headers: None,
        body: info.to_body(),
    }
}

impl BatchCoordinator {
    pub fn new(dispatcher: Arc<Dispatcher>, unit_of_work: Arc<dyn UnitOfWork>) -> Self {
        Self {
            dispatcher,
            unit_of_work,
            resolver: ReferenceResolver::new(),
        }
    }

    /// Execute `requests` in order under `mode`
    pub async fn execute(
        &self,
        requests: Vec<BatchRequest>,
        mode: ExecutionMode,
        user: &AuthenticatedUser,
    ) -> BatchOutcome {
        debug!("Batch of {} items {:?}", requests.len(), BatchState::Pending);
        info!(
            "Batch {:?}: {} items, mode {:?}, user {}",
            BatchState::Running,
            requests.len(),
            mode,
            user.username
        );

        let outcome = match mode {
            ExecutionMode::Independent => self.run_independent(&requests, user).await,
            ExecutionMode::Transactional => self.run_transactional(&requests, user).await,
        };

        info!(
            "Batch finished: {:?}, {} responses",
            outcome.state,
            outcome.responses.len()
        );
        outcome
    }

    async fn run_independent(&self, requests: &[BatchRequest], user: &AuthenticatedUser) -> BatchOutcome {
        let ctx = InvocationContext {
            user: user.clone(),
            transaction: None,
        };
        let mut run = BatchRun::default();
        let mut responses = Vec::with_capacity(requests.len());

        for request in requests {
            let response = match self.process_item(request, &run, &ctx).await {
                Ok(response) => response,
                Err(failure) => error_response(Some(request.request_id), &normalize(&failure)),
            };
            run.record(&response);
            responses.push(response);
        }

        BatchOutcome {
            responses,
            state: BatchState::Completed,
        }
    }

    async fn run_transactional(&self, requests: &[BatchRequest], user: &AuthenticatedUser) -> BatchOutcome {
        let guard = match TransactionGuard::begin(self.unit_of_work.as_ref()).await {
            Ok(guard) => guard,
            Err(failure) => {
                error!("Could not open enclosing transaction: {}", failure);
                return BatchOutcome {
                    responses: vec![error_response(None, &normalize(&failure))],
                    state: BatchState::RolledBack,
                };
            }
        };
        debug!("Enclosing transaction {} opened", guard.id());

        let ctx = InvocationContext {
            user: user.clone(),
            transaction: Some(guard.id()),
        };
        let mut run = BatchRun::default();
        let mut responses = Vec::with_capacity(requests.len());

        for request in requests {
            match self.process_item(request, &run, &ctx).await {
                Ok(response) => {
                    run.record(&response);
                    responses.push(response);
                }
                Err(failure) => {
                    warn!(
                        "Request {} failed, rolling back {}: {}",
                        request.request_id,
                        guard.id(),
                        failure
                    );
                    guard.rollback().await;
                    return BatchOutcome {
                        responses: vec![error_response(Some(request.request_id), &normalize(&failure))],
                        state: BatchState::RolledBack,
                    };
                }
            }
        }

        let tx = guard.id();
        match guard.commit().await {
            Ok(()) => {
                debug!("Enclosing transaction {} committed", tx);
                BatchOutcome {
                    responses,
                    state: BatchState::Committed,
                }
            }
            Err(failure) => {
                error!("Commit of {} failed: {}", tx, failure);
                BatchOutcome {
                    responses: vec![error_response(None, &normalize(&failure))],
                    state: BatchState::RolledBack,
                }
            }
        }
    }

    /// Resolve and dispatch one item
    ///
    /// Any failure comes back as an explicit [`ItemFailure`]; a non-2xx status
    /// returned by a handler is a response, not a failure.
    async fn process_item(
        &self,
        request: &BatchRequest,
        run: &BatchRun,
        ctx: &InvocationContext,
    ) -> Result<BatchResponse, ItemFailure> {
        let id = request.request_id;
        debug!("Request {} {}: {}", id, ItemState::Queued, request_summary(request));

        let outcome = self.resolve_and_dispatch(request, run, ctx).await;

        match &outcome {
            Ok(response) => debug!("Request {} {} with status {}", id, ItemState::Succeeded, response.status_code),
            Err(failure) => warn!("Request {} {}: {}", id, ItemState::Failed, failure),
        }
        outcome
    }

    async fn resolve_and_dispatch(
        &self,
        request: &BatchRequest,
        run: &BatchRun,
        ctx: &InvocationContext,
    ) -> Result<BatchResponse, ItemFailure> {
        let id = request.request_id;
        if run.produced.contains_key(&id) {
            return Err(ItemFailure::DuplicateRequestId(id));
        }

        let resolved = self.resolver.resolve(request, &run.produced)?;
        debug!("Request {} {}", id, ItemState::Resolved);

        let result = self.dispatcher.dispatch(&resolved, ctx).await;
        debug!("Request {} {}", id, ItemState::Dispatched);
        result.map(|response| success_response(id, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiHandler, ApiRequest};
    use crate::models::HttpMethod;
    use crate::services::dispatcher::DispatchResult;
    use crate::storage::{StorageError, StorageResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingUnitOfWork {
        begins: AtomicUsize,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
        fail_begin: bool,
        fail_commit: bool,
    }

    #[async_trait]
    impl UnitOfWork for CountingUnitOfWork {
        async fn begin(&self) -> StorageResult<TransactionId> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            if self.fail_begin {
                return Err(StorageError::InvalidState("pool exhausted".to_string()));
            }
            Ok(TransactionId::new())
        }

        async fn commit(&self, tx: TransactionId) -> StorageResult<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            if self.fail_commit {
                return Err(StorageError::UnknownTransaction(tx));
            }
            Ok(())
        }

        async fn rollback(&self, _tx: TransactionId) -> StorageResult<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Succeeds with `{"resourceId": <requestId-derived>}` unless the body is "fail"
    #[derive(Default)]
    struct Scripted {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ApiHandler for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn handle(&self, request: ApiRequest, ctx: &InvocationContext) -> DispatchResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if request.body.as_deref() == Some("fail") {
                return Err(ItemFailure::DomainValidation("scripted failure".to_string()));
            }
            Ok(ApiResponse {
                status: None,
                headers: None,
                body: format!(
                    r#"{{"resourceId": {}, "inTransaction": {}}}"#,
                    n * 10,
                    ctx.transaction.is_some()
                ),
            })
        }
    }

    fn coordinator(uow: Arc<CountingUnitOfWork>, handler: Arc<Scripted>) -> BatchCoordinator {
        let dispatcher = Dispatcher::new()
            .route(HttpMethod::Post, "things", handler.clone())
            .route(HttpMethod::Get, "things/{id}", handler);
        BatchCoordinator::new(Arc::new(dispatcher), uow)
    }

    fn user() -> AuthenticatedUser {
        AuthenticatedUser::new("tester", vec!["ALL_FUNCTIONS".to_string()])
    }

    fn post(id: i64, body: &str) -> BatchRequest {
        BatchRequest::new(id, HttpMethod::Post, "things").with_body(body)
    }

    #[tokio::test]
    async fn test_independent_isolates_failures() {
        let uow = Arc::new(CountingUnitOfWork::default());
        let handler = Arc::new(Scripted::default());
        let coordinator = coordinator(uow.clone(), handler.clone());

        let requests = vec![post(1, "{}"), post(2, "fail"), post(3, "{}")];
        let outcome = coordinator.execute(requests, ExecutionMode::Independent, &user()).await;

        let ids: Vec<_> = outcome.responses.iter().map(|r| r.request_id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
        let statuses: Vec<_> = outcome.responses.iter().map(|r| r.status_code).collect();
        assert_eq!(statuses, vec![200, 400, 200]);
        assert_eq!(outcome.state, BatchState::Completed);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(uow.begins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transactional_commits_once() {
        let uow = Arc::new(CountingUnitOfWork::default());
        let coordinator = coordinator(uow.clone(), Arc::new(Scripted::default()));

        let requests = vec![post(1, "{}"), post(2, "{}")];
        let outcome = coordinator.execute(requests, ExecutionMode::Transactional, &user()).await;

        assert_eq!(outcome.state, BatchState::Committed);
        assert_eq!(outcome.responses.len(), 2);
        assert!(outcome.responses.iter().all(|r| r.is_success()));
        assert!(outcome.responses[0].body.contains(r#""inTransaction": true"#));
        assert_eq!(uow.begins.load(Ordering::SeqCst), 1);
        assert_eq!(uow.commits.load(Ordering::SeqCst), 1);
        assert_eq!(uow.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transactional_stops_at_first_failure() {
        let uow = Arc::new(CountingUnitOfWork::default());
        let handler = Arc::new(Scripted::default());
        let coordinator = coordinator(uow.clone(), handler.clone());

        let requests = vec![post(1, "{}"), post(2, "fail"), post(3, "{}")];
        let outcome = coordinator.execute(requests, ExecutionMode::Transactional, &user()).await;

        assert_eq!(outcome.state, BatchState::RolledBack);
        assert_eq!(outcome.responses.len(), 1);
        assert_eq!(outcome.responses[0].request_id, Some(2));
        assert_eq!(outcome.responses[0].status_code, 400);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(uow.commits.load(Ordering::SeqCst), 0);
        assert_eq!(uow.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reference_to_earlier_item() {
        let uow = Arc::new(CountingUnitOfWork::default());
        let coordinator = coordinator(uow, Arc::new(Scripted::default()));

        let requests = vec![
            post(1, "{}"),
            BatchRequest::new(2, HttpMethod::Get, "things/$.resourceId").with_reference(1),
            BatchRequest::new(3, HttpMethod::Get, "things/1").with_reference(4),
        ];
        let outcome = coordinator.execute(requests, ExecutionMode::Independent, &user()).await;

        assert_eq!(outcome.responses[1].status_code, 200);
        assert_eq!(outcome.responses[2].status_code, 400);
        let info: ErrorInfo = serde_json::from_str(&outcome.responses[2].body).unwrap();
        assert_eq!(info.error_code, "error.msg.batch.unresolved.reference");
    }

    #[tokio::test]
    async fn test_duplicate_request_id() {
        let uow = Arc::new(CountingUnitOfWork::default());
        let coordinator = coordinator(uow, Arc::new(Scripted::default()));

        let outcome = coordinator
            .execute(vec![post(1, "{}"), post(1, "{}")], ExecutionMode::Independent, &user())
            .await;

        assert_eq!(outcome.responses.len(), 2);
        assert_eq!(outcome.responses[1].status_code, 400);
        assert_eq!(outcome.responses[1].request_id, Some(1));
    }

    #[tokio::test]
    async fn test_begin_failure_dispatches_nothing() {
        let uow = Arc::new(CountingUnitOfWork {
            fail_begin: true,
            ..Default::default()
        });
        let handler = Arc::new(Scripted::default());
        let coordinator = coordinator(uow.clone(), handler.clone());

        let outcome = coordinator
            .execute(vec![post(1, "{}")], ExecutionMode::Transactional, &user())
            .await;

        assert_eq!(outcome.responses.len(), 1);
        assert_eq!(outcome.responses[0].request_id, None);
        assert_eq!(outcome.responses[0].status_code, 500);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(uow.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_is_not_rolled_back_again() {
        let uow = Arc::new(CountingUnitOfWork {
            fail_commit: true,
            ..Default::default()
        });
        let coordinator = coordinator(uow.clone(), Arc::new(Scripted::default()));

        let outcome = coordinator
            .execute(vec![post(1, "{}")], ExecutionMode::Transactional, &user())
            .await;

        assert_eq!(outcome.state, BatchState::RolledBack);
        assert_eq!(outcome.responses[0].status_code, 500);
        assert_eq!(uow.commits.load(Ordering::SeqCst), 1);
        assert_eq!(uow.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_transactional_batch_commits() {
        let uow = Arc::new(CountingUnitOfWork::default());
        let coordinator = coordinator(uow.clone(), Arc::new(Scripted::default()));

        let outcome = coordinator.execute(Vec::new(), ExecutionMode::Transactional, &user()).await;

        assert!(outcome.responses.is_empty());
        assert_eq!(uow.begins.load(Ordering::SeqCst), 1);
        assert_eq!(uow.commits.load(Ordering::SeqCst), 1);
    }
}
