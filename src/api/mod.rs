//! Internal API module
//!
//! Defines the handler contract the dispatcher invokes, and the demonstration
//! ledger handlers that implement it

pub mod clients;
pub mod loans;

use crate::middleware::auth::AuthenticatedUser;
use crate::models::{Headers, HttpMethod};
use crate::services::dispatcher::Dispatcher;
use crate::storage::{MemoryLedger, TransactionId};
use crate::utils::error::{helpers, ErrorContext, ItemFailure};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub use clients::{ClientAction, ClientHandler};
pub use loans::{LoanAction, LoanHandler};

/// Permission granting every operation
pub const ALL_FUNCTIONS: &str = "ALL_FUNCTIONS";

/// A resolved sub-request as seen by an internal handler
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path without query string
    pub path: String,
    /// Values captured by `{name}` segments of the route pattern
    pub path_params: HashMap<String, String>,
    /// Decoded query parameters
    pub query: HashMap<String, String>,
    pub headers: Headers,
    pub body: Option<String>,
}

impl ApiRequest {
    /// Numeric path parameter
    pub fn path_id(&self, name: &str) -> Result<u64, ItemFailure> {
        let raw = self
            .path_params
            .get(name)
            .ok_or_else(|| helpers::unexpected_failure(format!("route has no parameter {}", name)))?;
        raw.parse()
            .map_err(|_| helpers::not_found_failure(format!("No resource with identifier {}", raw)))
    }

    /// Parse the body as JSON
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, ItemFailure> {
        let body = self
            .body
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| helpers::validation_failure("The request body is mandatory"))?;
        serde_json::from_str(body).validation_context("The request body is not valid")
    }
}

/// Outcome of a successful handler call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// Explicit status; 200 when absent
    pub status: Option<u16>,
    pub headers: Option<Headers>,
    pub body: String,
}

impl ApiResponse {
    /// 200 response with a JSON body
    pub fn json<T: Serialize>(value: &T) -> Result<Self, ItemFailure> {
        let body = serde_json::to_string(value).unexpected_context("Failed to serialize response")?;
        Ok(Self {
            status: None,
            headers: None,
            body,
        })
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Per-dispatch context shared with the handler
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub user: AuthenticatedUser,
    /// Open unit-of-work of a transactional batch
    pub transaction: Option<TransactionId>,
}

impl InvocationContext {
    /// Fail with an authorization failure unless the caller holds `permission`
    pub fn require(&self, permission: &str) -> Result<(), ItemFailure> {
        if self.user.has_permission(permission) {
            Ok(())
        } else {
            Err(helpers::authorization_failure(permission))
        }
    }
}

/// Internal API handler
///
/// Handlers are opaque to the batch core: they receive the resolved request
/// and either succeed with a response or fail with an [`ItemFailure`].
#[async_trait]
pub trait ApiHandler: Send + Sync {
    /// Handler name for logs
    fn name(&self) -> &str;

    /// Execute the operation
    async fn handle(&self, request: ApiRequest, ctx: &InvocationContext) -> Result<ApiResponse, ItemFailure>;
}

/// Build the dispatcher serving the ledger's internal API
pub fn ledger_dispatcher(ledger: Arc<MemoryLedger>) -> Dispatcher {
    let client = |action| Arc::new(ClientHandler::new(ledger.clone(), action));
    let loan = |action| Arc::new(LoanHandler::new(ledger.clone(), action));

    Dispatcher::new()
        .route(HttpMethod::Post, "clients", client(ClientAction::Create))
        .route(HttpMethod::Get, "clients", client(ClientAction::List))
        .route(HttpMethod::Get, "clients/{clientId}", client(ClientAction::Retrieve))
        .route(HttpMethod::Put, "clients/{clientId}", client(ClientAction::Update))
        .route(HttpMethod::Delete, "clients/{clientId}", client(ClientAction::Delete))
        .route_command(HttpMethod::Post, "clients/{clientId}", "activate", client(ClientAction::Activate))
        .route(HttpMethod::Post, "loans", loan(LoanAction::Apply))
        .route(HttpMethod::Get, "loans/{loanId}", loan(LoanAction::Retrieve))
        .route_command(HttpMethod::Post, "loans/{loanId}", "approve", loan(LoanAction::Approve))
        .route_command(HttpMethod::Post, "loans/{loanId}", "disburse", loan(LoanAction::Disburse))
        .route_command(
            HttpMethod::Post,
            "loans/{loanId}/transactions",
            "repayment",
            loan(LoanAction::Repayment),
        )
        .route(HttpMethod::Get, "loans/{loanId}/transactions", loan(LoanAction::Transactions))
}
