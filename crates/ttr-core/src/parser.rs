//! Provider response parsing.
//!
//! The provider answers every history listing with the same envelope:
//!
//! ```json
//! {"status": "1", "message": "OK", "result": [ ...records... ]}
//! {"status": "0", "message": "NOTOK", "result": "Max rate limit reached"}
//! ```
//!
//! An array `result` is a success (an empty array is a node with no
//! history). Anything else is an error whose text is classified into a
//! [`FetchError`].

use crate::address::Address;
use crate::edge::Edge;
use crate::error::FetchError;
use crate::tx::TxType;
use serde_json::{Map, Value};
use tracing::debug;

/// Decimals of the native currency.
const NATIVE_DECIMALS: i32 = 18;
const NATIVE_SYMBOL: &str = "ETH";

/// Parses a raw response body into edges.
pub fn parse_response(body: &str, tx_type: TxType) -> Result<Vec<Edge>, FetchError> {
    let envelope: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    parse_value(&envelope, tx_type)
}

/// Parses an already decoded response envelope into edges.
pub fn parse_value(envelope: &Value, tx_type: TxType) -> Result<Vec<Edge>, FetchError> {
    let object = envelope
        .as_object()
        .ok_or_else(|| FetchError::Malformed("response is not a JSON object".to_string()))?;

    match object.get("result") {
        Some(Value::Array(records)) => {
            let mut edges = Vec::with_capacity(records.len());
            for record in records {
                let record = record.as_object().ok_or_else(|| {
                    FetchError::Malformed("result entry is not an object".to_string())
                })?;
                if let Some(edge) = parse_record(record, tx_type)? {
                    edges.push(edge);
                }
            }
            Ok(edges)
        }
        _ => Err(classify_envelope(object)),
    }
}

/// Builds the error for a non-array result from `message` and `result`.
fn classify_envelope(object: &Map<String, Value>) -> FetchError {
    let message = object.get("message").and_then(Value::as_str).unwrap_or("");
    let detail = object.get("result").and_then(Value::as_str).unwrap_or("");

    match (message.is_empty(), detail.is_empty()) {
        (true, true) => FetchError::Malformed("response has neither result nor message".into()),
        (false, true) => FetchError::classify(message),
        (true, false) => FetchError::classify(detail),
        (false, false) => FetchError::classify(&format!("{message}: {detail}")),
    }
}

/// Parses one history record. Records that do not describe a transfer
/// between two addresses are skipped.
fn parse_record(record: &Map<String, Value>, tx_type: TxType) -> Result<Option<Edge>, FetchError> {
    let hash = text(record, "hash");
    let from = Address::new(text(record, "from"));

    // Contract creations report the created contract instead of a recipient.
    let mut to = Address::new(text(record, "to"));
    if to.is_empty() {
        to = Address::new(text(record, "contractAddress"));
    }

    if from.is_empty() || to.is_empty() {
        debug!("Skipping {} record {} without both endpoints", tx_type, hash);
        return Ok(None);
    }
    if text(record, "isError") == "1" {
        debug!("Skipping failed {} transaction {}", tx_type, hash);
        return Ok(None);
    }

    let block_number = number(record, "blockNumber")?;
    let timestamp = number(record, "timeStamp")?;

    let (value, symbol, contract) = match tx_type {
        TxType::External | TxType::Internal => (
            scaled(record, "value", NATIVE_DECIMALS)?,
            NATIVE_SYMBOL.to_string(),
            None,
        ),
        TxType::Erc20 => {
            let decimals = match text(record, "tokenDecimal") {
                "" => 0,
                raw => raw
                    .parse::<i32>()
                    .map_err(|e| FetchError::Malformed(format!("tokenDecimal {raw:?}: {e}")))?,
            };
            (
                scaled(record, "value", decimals)?,
                text(record, "tokenSymbol").to_string(),
                contract_of(record),
            )
        }
        // Every NFT transfer moves exactly one token.
        TxType::Erc721 => (
            1.0,
            text(record, "tokenSymbol").to_string(),
            contract_of(record),
        ),
    };

    let log_index = match text(record, "logIndex") {
        "" => None,
        raw => Some(
            raw.parse::<u64>()
                .map_err(|e| FetchError::Malformed(format!("logIndex {raw:?}: {e}")))?,
        ),
    };
    let trace_id = match text(record, "traceId") {
        "" => None,
        raw => Some(raw.to_string()),
    };

    Ok(Some(Edge {
        hash: hash.to_string(),
        tx_type,
        from,
        to,
        value,
        timestamp,
        block_number,
        symbol,
        contract,
        log_index,
        trace_id,
        raw: Value::Object(record.clone()),
    }))
}

/// A string field, or `""` when absent or not a string.
fn text<'a>(record: &'a Map<String, Value>, field: &str) -> &'a str {
    record.get(field).and_then(Value::as_str).unwrap_or("").trim()
}

/// An unsigned integer field; providers send these as decimal strings.
fn number(record: &Map<String, Value>, field: &str) -> Result<u64, FetchError> {
    match record.get(field) {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| FetchError::Malformed(format!("{field} is not an unsigned integer"))),
        Some(Value::String(s)) if !s.trim().is_empty() => s
            .trim()
            .parse::<u64>()
            .map_err(|e| FetchError::Malformed(format!("{field} {s:?}: {e}"))),
        _ => Err(FetchError::Malformed(format!("missing field {field}"))),
    }
}

/// A base-unit amount divided by `10^decimals`.
fn scaled(record: &Map<String, Value>, field: &str, decimals: i32) -> Result<f64, FetchError> {
    let raw = text(record, field);
    if raw.is_empty() {
        return Ok(0.0);
    }
    let base = raw
        .parse::<f64>()
        .map_err(|e| FetchError::Malformed(format!("{field} {raw:?}: {e}")))?;
    Ok(base / 10f64.powi(decimals))
}

fn contract_of(record: &Map<String, Value>) -> Option<Address> {
    match text(record, "contractAddress") {
        "" => None,
        raw => Some(Address::new(raw)),
    }
}
