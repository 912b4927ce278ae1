//! Typed decode step from raw ledger events to [`ChangeEvent`]

use crate::error::DecodeError;
use crate::types::{ChangeEvent, RawEvent};
use serde::{Deserialize, Serialize};

/// Contract event envelope as emitted by the ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractEvent {
    /// Height of the block holding the transaction
    #[serde(default)]
    pub block_height: i64,
    /// Chain identifier
    #[serde(default)]
    pub chain_id: String,
    /// Event topic
    #[serde(default)]
    pub topic: String,
    /// Transaction identifier
    #[serde(default)]
    pub tx_id: String,
    /// Emitting contract
    #[serde(default)]
    pub contract_name: String,
    /// JSON-encoded payloads; the first one carries the balance change
    pub event_data: Vec<String>,
}

/// Balance change payload carried in `event_data[0]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChange {
    /// Wallet address
    pub address: String,
    /// Ledger height
    pub height: i64,
    /// Balance after the change
    pub balance: i64,
    /// Signed change amount
    pub change_value: i64,
    /// Transaction identifier
    #[serde(default)]
    pub tx_id: String,
}

/// Decode one raw record
pub fn decode_event(raw: &RawEvent) -> Result<ChangeEvent, DecodeError> {
    if raw.0.is_null() {
        return Err(DecodeError::NilEvent);
    }

    let envelope: ContractEvent = serde_json::from_value(raw.0.clone())
        .map_err(|e| DecodeError::Envelope(e.to_string()))?;

    let payload = envelope
        .event_data
        .first()
        .ok_or(DecodeError::EmptyPayload)?;

    let change: BalanceChange =
        serde_json::from_str(payload).map_err(|e| DecodeError::Payload(e.to_string()))?;

    if change.address.is_empty() {
        return Err(DecodeError::MissingField("address"));
    }

    let tx_id = if change.tx_id.is_empty() {
        envelope.tx_id
    } else {
        change.tx_id
    };
    if tx_id.is_empty() {
        return Err(DecodeError::MissingField("txId"));
    }

    Ok(ChangeEvent {
        address: change.address,
        height: change.height,
        balance: change.balance,
        change_value: change.change_value,
        tx_id,
        contract_name: envelope.contract_name,
        topic: envelope.topic,
        chain_id: envelope.chain_id,
    })
}
