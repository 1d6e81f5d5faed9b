//! GraphQL request/response envelopes shared by the payload generator and the
//! ledger client.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

/// Mutation document used for every submitted transfer.
pub const SEND_TRANSACTION_MUTATION: &str = "mutation ( $inputRaw: InputRawTransaction! $inputEncryption: InputTransactionEncryption! ) { sendTransaction(inputRaw: $inputRaw, inputEncryption: $inputEncryption) }";

#[derive(Debug, Serialize)]
pub struct GraphQlRequest<'a, V> {
    pub query: &'a str,
    pub variables: V,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

impl<T> GraphQlResponse<T> {
    /// Collapse the response into its data, treating any reported error as fatal.
    pub fn into_data(self) -> Result<T> {
        if !self.errors.is_empty() {
            let messages: Vec<_> = self.errors.into_iter().map(|e| e.message).collect();
            return Err(BenchError::Ledger(messages.join("; ")));
        }
        self.data
            .ok_or_else(|| BenchError::Ledger("response carried no data".to_string()))
    }
}

/// Decode a GraphQL response body.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let response: GraphQlResponse<T> = serde_json::from_slice(body)?;
    response.into_data()
}

/// Parse a ledger quantity encoded as `0x`-hex or plain decimal.
pub fn parse_quantity(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    let parsed = match trimmed.strip_prefix("0x") {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => trimmed.parse::<u64>(),
    };
    parsed.map_err(|err| BenchError::Ledger(format!("invalid quantity {raw:?}: {err}")))
}
