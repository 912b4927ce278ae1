//! User authorization and initial synchronization
//!
//! Authorizing a user fixes their baseline: the latest wallet state known to
//! the gateway. Changes below that height are never relayed for the user.
//! The baseline itself reaches the downstream consumer as an `INIT` row that
//! the reconciliation poller delivers.

use crate::errors::{ProxyError, Result};
use crate::gateway::{latest_wallet_info, Wallet, WalletGateway};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sync_core::types::INIT_EVENT_TYPE;
use sync_core::{AuthorizationStore, NewAuthorization, NewSyncLogEntry};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub dcid: String,
    #[serde(default)]
    pub userid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthResponse {
    pub balance: i64,
    pub wallet: Option<Wallet>,
}

pub struct AuthService {
    store: Arc<dyn AuthorizationStore>,
    gateway: Arc<dyn WalletGateway>,
    contract_name: String,
    chain_id: String,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn AuthorizationStore>,
        gateway: Arc<dyn WalletGateway>,
        contract_name: impl Into<String>,
        chain_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            contract_name: contract_name.into(),
            chain_id: chain_id.into(),
        }
    }

    /// Authorize `request.userid` against the wallet gateway
    pub async fn authorize(&self, request: AuthRequest) -> Result<AuthResponse> {
        if request.userid.is_empty() {
            return Err(ProxyError::Validation("userid is required".to_string()));
        }

        if self.store.find_by_user_id(&request.userid).await?.is_some() {
            return Err(ProxyError::AlreadyAuthorized(request.userid));
        }

        let address = self.gateway.user_address(&request.userid).await?;
        let history = self.gateway.wallet_history(&address).await?;
        let latest = latest_wallet_info(history)
            .ok_or_else(|| ProxyError::EmptyWalletHistory(address.clone()))?;
        debug!(
            user_id = %request.userid,
            height = latest.block_height,
            "Selected latest wallet state as baseline"
        );

        let init_entry = NewSyncLogEntry {
            user_id: request.userid.clone(),
            block_height: latest.block_height,
            balance_after: latest.total,
            change_value: 0,
            event_type: INIT_EVENT_TYPE.to_string(),
            tx_id: format!("init_sync_tx_{}", Uuid::new_v4()),
            contract_name: self.contract_name.clone(),
            chain_id: self.chain_id.clone(),
        };

        let record = self
            .store
            .authorize(NewAuthorization {
                user_id: request.userid,
                address,
                dcid: request.dcid,
                baseline_height: latest.block_height,
                baseline_balance: latest.total,
                init_entry,
            })
            .await?;

        info!(
            user_id = %record.user_id,
            address = %record.address,
            baseline_height = record.baseline_height,
            "User authorized"
        );

        Ok(AuthResponse {
            balance: latest.total,
            wallet: latest.wallet_info,
        })
    }
}
