//! Demonstration ledger data models
//!
//! Entities and command payloads served by the in-memory internal API

use serde::{Deserialize, Serialize};

/// Client lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Pending,
    Active,
}

/// Client entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub status: ClientStatus,
}

/// Loan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    SubmittedAndPendingApproval,
    Approved,
    Active,
    ClosedObligationsMet,
}

/// Loan transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanTransactionType {
    Disbursement,
    Repayment,
}

/// A money movement against a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanTransaction {
    pub id: u64,
    #[serde(rename = "type")]
    pub transaction_type: LoanTransactionType,
    pub amount: f64,
    pub outstanding_after: f64,
}

/// Loan entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: u64,
    pub client_id: u64,
    pub principal: f64,
    pub outstanding: f64,
    pub status: LoanStatus,
    pub transactions: Vec<LoanTransaction>,
}

/// `POST clients` / `PUT clients/{clientId}` payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPayload {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    /// Activate immediately on creation
    #[serde(default)]
    pub active: bool,
}

/// `POST loans` payload
///
/// `clientId` is accepted as a number or a numeric string so that it can be
/// filled in from an earlier sub-response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanApplicationPayload {
    pub client_id: serde_json::Value,
    pub principal: f64,
}

/// `POST loans/{loanId}/transactions?command=repayment` payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentPayload {
    pub transaction_amount: f64,
}

/// Body returned by write commands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub resource_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan_id: Option<u64>,
}
