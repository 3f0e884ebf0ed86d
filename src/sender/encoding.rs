use crate::domain::Record;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Decoded payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// JSON array of the records, in order.
pub fn encode_json(records: &[Record]) -> Result<String, EncodingError> {
    Ok(serde_json::to_string(records)?)
}

pub fn decode_json(payload: &str) -> Result<Vec<Record>, EncodingError> {
    Ok(serde_json::from_str(payload)?)
}

/// Form-safe representation: base64 of the JSON array.
pub fn encode(records: &[Record]) -> Result<String, EncodingError> {
    let json = serde_json::to_vec(records)?;
    Ok(STANDARD.encode(json))
}

pub fn decode(payload: &str) -> Result<Vec<Record>, EncodingError> {
    let bytes = STANDARD.decode(payload.trim())?;
    let json = String::from_utf8(bytes)?;
    decode_json(&json)
}

/// `data=<base64>` body, as sent by the socket consumer and the forked curl.
/// Base64 padding and `+`/`/` are percent-encoded so the body is a valid form.
pub fn encode_form_body(records: &[Record]) -> Result<String, EncodingError> {
    let encoded = encode(records)?;
    let escaped: String = url::form_urlencoded::byte_serialize(encoded.as_bytes()).collect();
    Ok(format!("data={escaped}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                Record::new()
                    .with("event", format!("event-{i}"))
                    .with("properties", json!({"n": i, "tags": ["a", "b"], "ok": i % 2 == 0}))
            })
            .collect()
    }

    #[test]
    fn test_round_trip_preserves_order() {
        for n in [0, 1, 7, 50] {
            let records = sample(n);
            let encoded = encode(&records).unwrap();
            assert_eq!(decode(&encoded).unwrap(), records);
        }
    }

    #[test]
    fn test_empty_batch_encodes_to_empty_array() {
        assert_eq!(encode_json(&[]).unwrap(), "[]");
        assert_eq!(decode(&encode(&[]).unwrap()).unwrap(), Vec::<Record>::new());
    }

    #[test]
    fn test_unicode_survives() {
        let records = vec![Record::new().with("name", "ラスク ✓")];
        assert_eq!(decode(&encode(&records).unwrap()).unwrap(), records);
    }

    #[test]
    fn test_form_body_is_url_safe() {
        let records = sample(3);
        let body = encode_form_body(&records).unwrap();
        let value = body.strip_prefix("data=").unwrap();
        assert!(!value.contains('+') && !value.contains('/') && !value.contains('='));

        let (key, decoded) = url::form_urlencoded::parse(body.as_bytes()).next().unwrap();
        assert_eq!(key, "data");
        assert_eq!(decode(&decoded).unwrap(), records);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("***"), Err(EncodingError::Base64(_))));
        let not_json = STANDARD.encode("not json");
        assert!(matches!(decode(&not_json), Err(EncodingError::Json(_))));
    }
}
