use serde::Deserialize;

use super::{parse_account_id, AccountId, EntryKind, ValidationError};

pub const MAX_DESCRIPTION_CHARS: usize = 10;

/// Transaction body as submitted by a client, before validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransactionRequest {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
}

impl TransactionRequest {
    pub fn new(kind: &str, description: &str, amount: i64) -> Self {
        Self {
            kind: Some(kind.to_string()),
            description: Some(description.to_string()),
            amount: Some(amount),
        }
    }
}

/// A validated request, ready to be applied against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostTransactionCommand {
    pub account_id: AccountId,
    pub kind: EntryKind,
    pub description: String,
    pub amount: i64,
}

impl PostTransactionCommand {
    /// Checks id, type, description and amount, in that order.
    pub fn validate(account_id: &str, request: &TransactionRequest) -> Result<Self, ValidationError> {
        let account_id = parse_account_id(account_id)?;

        let kind = request
            .kind
            .as_deref()
            .ok_or(ValidationError::InvalidType)?
            .parse::<EntryKind>()?;

        let description = match request.description.as_deref() {
            Some(d) if (1..=MAX_DESCRIPTION_CHARS).contains(&d.chars().count()) => d.to_string(),
            _ => return Err(ValidationError::InvalidDescription),
        };

        let amount = match request.amount {
            Some(a) if a > 0 => a,
            _ => return Err(ValidationError::InvalidAmount),
        };

        Ok(Self {
            account_id,
            kind,
            description,
            amount,
        })
    }
}
