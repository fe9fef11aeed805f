//! Loan resource handlers

use crate::api::{ApiHandler, ApiRequest, ApiResponse, InvocationContext};
use crate::models::ledger::{CommandResult, LoanApplicationPayload, RepaymentPayload};
use crate::storage::MemoryLedger;
use crate::utils::error::{helpers, ItemFailure};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Operation performed by a [`LoanHandler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanAction {
    Apply,
    Retrieve,
    Approve,
    Disburse,
    Repayment,
    Transactions,
}

impl LoanAction {
    fn permission(&self) -> &'static str {
        match self {
            LoanAction::Apply => "CREATE_LOAN",
            LoanAction::Retrieve | LoanAction::Transactions => "READ_LOAN",
            LoanAction::Approve => "APPROVE_LOAN",
            LoanAction::Disburse => "DISBURSE_LOAN",
            LoanAction::Repayment => "REPAYMENT_LOAN",
        }
    }
}

/// Handler for the `loans` resource
pub struct LoanHandler {
    ledger: Arc<MemoryLedger>,
    action: LoanAction,
}

impl LoanHandler {
    pub fn new(ledger: Arc<MemoryLedger>, action: LoanAction) -> Self {
        Self { ledger, action }
    }
}

/// Accept a client id given as a number or a numeric string
fn parse_client_id(value: &Value) -> Result<u64, ItemFailure> {
    let id = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    id.ok_or_else(|| helpers::validation_failure(format!("The parameter clientId must be a positive integer, got {}", value)))
}

fn positive_amount(amount: f64, parameter: &str) -> Result<f64, ItemFailure> {
    if amount.is_finite() && amount > 0.0 {
        Ok(amount)
    } else {
        Err(helpers::validation_failure(format!(
            "The parameter {} must be greater than 0",
            parameter
        )))
    }
}

fn loan_result(loan_id: u64, client_id: u64) -> CommandResult {
    CommandResult {
        resource_id: loan_id,
        client_id: Some(client_id),
        loan_id: Some(loan_id),
    }
}

#[async_trait]
impl ApiHandler for LoanHandler {
    fn name(&self) -> &str {
        match self.action {
            LoanAction::Apply => "apply_loan",
            LoanAction::Retrieve => "retrieve_loan",
            LoanAction::Approve => "approve_loan",
            LoanAction::Disburse => "disburse_loan",
            LoanAction::Repayment => "loan_repayment",
            LoanAction::Transactions => "loan_transactions",
        }
    }

    async fn handle(&self, request: ApiRequest, ctx: &InvocationContext) -> Result<ApiResponse, ItemFailure> {
        ctx.require(self.action.permission())?;
        let tx = ctx.transaction;

        match self.action {
            LoanAction::Apply => {
                let payload: LoanApplicationPayload = request.json_body()?;
                let client_id = parse_client_id(&payload.client_id)?;
                let principal = positive_amount(payload.principal, "principal")?;
                let loan = self.ledger.create_loan(tx, client_id, principal).await?;
                debug!("Loan {} submitted for client {}", loan.id, client_id);
                ApiResponse::json(&loan_result(loan.id, client_id))
            }
            LoanAction::Retrieve => {
                let loan = self.ledger.loan(tx, request.path_id("loanId")?).await?;
                ApiResponse::json(&loan)
            }
            LoanAction::Approve => {
                let loan = self.ledger.approve_loan(tx, request.path_id("loanId")?).await?;
                ApiResponse::json(&loan_result(loan.id, loan.client_id))
            }
            LoanAction::Disburse => {
                let loan = self.ledger.disburse_loan(tx, request.path_id("loanId")?).await?;
                ApiResponse::json(&loan_result(loan.id, loan.client_id))
            }
            LoanAction::Repayment => {
                let loan_id = request.path_id("loanId")?;
                let payload: RepaymentPayload = request.json_body()?;
                let amount = positive_amount(payload.transaction_amount, "transactionAmount")?;
                let (loan, transaction_id) = self.ledger.repay_loan(tx, loan_id, amount).await?;
                ApiResponse::json(&CommandResult {
                    resource_id: transaction_id,
                    client_id: Some(loan.client_id),
                    loan_id: Some(loan.id),
                })
            }
            LoanAction::Transactions => {
                let loan = self.ledger.loan(tx, request.path_id("loanId")?).await?;
                ApiResponse::json(&loan.transactions)
            }
        }
    }
}
