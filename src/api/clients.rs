//! Client resource handlers

use crate::api::{ApiHandler, ApiRequest, ApiResponse, InvocationContext};
use crate::models::ledger::{ClientPayload, CommandResult};
use crate::storage::memory::NewClient;
use crate::storage::MemoryLedger;
use crate::utils::error::{helpers, ItemFailure};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Operation performed by a [`ClientHandler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    Create,
    List,
    Retrieve,
    Update,
    Delete,
    Activate,
}

impl ClientAction {
    fn permission(&self) -> &'static str {
        match self {
            ClientAction::Create => "CREATE_CLIENT",
            ClientAction::List | ClientAction::Retrieve => "READ_CLIENT",
            ClientAction::Update => "UPDATE_CLIENT",
            ClientAction::Delete => "DELETE_CLIENT",
            ClientAction::Activate => "ACTIVATE_CLIENT",
        }
    }
}

/// Handler for the `clients` resource
pub struct ClientHandler {
    ledger: Arc<MemoryLedger>,
    action: ClientAction,
}

impl ClientHandler {
    pub fn new(ledger: Arc<MemoryLedger>, action: ClientAction) -> Self {
        Self { ledger, action }
    }
}

fn mandatory(value: Option<String>, parameter: &str) -> Result<String, ItemFailure> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| helpers::validation_failure(format!("The parameter {} is mandatory", parameter)))
}

fn client_result(id: u64) -> CommandResult {
    CommandResult {
        resource_id: id,
        client_id: Some(id),
        loan_id: None,
    }
}

#[async_trait]
impl ApiHandler for ClientHandler {
    fn name(&self) -> &str {
        match self.action {
            ClientAction::Create => "create_client",
            ClientAction::List => "list_clients",
            ClientAction::Retrieve => "retrieve_client",
            ClientAction::Update => "update_client",
            ClientAction::Delete => "delete_client",
            ClientAction::Activate => "activate_client",
        }
    }

    async fn handle(&self, request: ApiRequest, ctx: &InvocationContext) -> Result<ApiResponse, ItemFailure> {
        ctx.require(self.action.permission())?;
        let tx = ctx.transaction;

        match self.action {
            ClientAction::Create => {
                let payload: ClientPayload = request.json_body()?;
                let client = self
                    .ledger
                    .create_client(
                        tx,
                        NewClient {
                            first_name: mandatory(payload.first_name, "firstName")?,
                            last_name: mandatory(payload.last_name, "lastName")?,
                            external_id: payload.external_id,
                            active: payload.active,
                        },
                    )
                    .await?;
                debug!("Client {} created by {}", client.id, ctx.user.username);
                ApiResponse::json(&client_result(client.id))
            }
            ClientAction::List => ApiResponse::json(&self.ledger.clients(tx).await?),
            ClientAction::Retrieve => {
                let client = self.ledger.client(tx, request.path_id("clientId")?).await?;
                ApiResponse::json(&client)
            }
            ClientAction::Update => {
                let id = request.path_id("clientId")?;
                let payload: ClientPayload = request.json_body()?;
                if payload.first_name.as_deref().is_some_and(|n| n.trim().is_empty())
                    || payload.last_name.as_deref().is_some_and(|n| n.trim().is_empty())
                {
                    return Err(helpers::validation_failure("Client names cannot be blank"));
                }
                self.ledger
                    .update_client(tx, id, payload.first_name, payload.last_name, payload.external_id)
                    .await?;
                ApiResponse::json(&client_result(id))
            }
            ClientAction::Delete => {
                let client = self.ledger.delete_client(tx, request.path_id("clientId")?).await?;
                ApiResponse::json(&client_result(client.id))
            }
            ClientAction::Activate => {
                let client = self.ledger.activate_client(tx, request.path_id("clientId")?).await?;
                ApiResponse::json(&client_result(client.id))
            }
        }
    }
}
