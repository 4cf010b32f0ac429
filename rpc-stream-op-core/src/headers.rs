//! Conversion between metadata batches and HTTP header maps.
//!
//! Binary metadata (keys ending in `-bin`) travels base64 encoded on the wire.
//! Values are encoded without padding and accepted with or without it.
//! The batch deadline travels as a relative `grpc-timeout` header.

use std::time::Instant;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::batch::MetadataBatch;
use crate::deadline::{Deadline, GRPC_TIMEOUT_HEADER, encode_grpc_timeout, parse_grpc_timeout};
use crate::element::{MetadataContext, MetadataElement};
use crate::error::MetadataError;

const BINARY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode a binary metadata value for display or transmission.
pub fn encode_binary_value(value: &[u8]) -> String {
    BINARY_ENGINE.encode(value)
}

/// Decode a base64 binary metadata value, padded or not.
pub fn decode_binary_value(key: &str, value: &[u8]) -> Result<Bytes, MetadataError> {
    BINARY_ENGINE
        .decode(value)
        .map(Bytes::from)
        .map_err(|e| MetadataError::InvalidBinaryValue {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

impl MetadataBatch {
    /// Build an HTTP header map from the active list.
    ///
    /// Elements are appended in list order, so repeated keys keep their
    /// relative order. A finite deadline is written as `grpc-timeout`.
    pub fn to_header_map(&self) -> Result<HeaderMap, MetadataError> {
        let mut headers = HeaderMap::with_capacity(self.len() + 1);
        for element in self.iter() {
            let (name, value) = header_pair(element)?;
            headers.append(name, value);
        }

        if let Some(left) = self.deadline().remaining(Instant::now()) {
            let value = HeaderValue::try_from(encode_grpc_timeout(left)).map_err(|_| {
                MetadataError::InvalidValue {
                    key: GRPC_TIMEOUT_HEADER.to_string(),
                }
            })?;
            headers.insert(GRPC_TIMEOUT_HEADER, value);
        }
        Ok(headers)
    }

    /// Build a batch from an HTTP header map, interning every element.
    ///
    /// `grpc-timeout` becomes the batch deadline rather than an element.
    pub fn from_header_map(
        ctx: &MetadataContext,
        headers: &HeaderMap,
    ) -> Result<MetadataBatch, MetadataError> {
        let mut batch = MetadataBatch::new();
        for (name, value) in headers {
            let key = name.as_str();
            if key == GRPC_TIMEOUT_HEADER {
                let raw = value
                    .to_str()
                    .map_err(|_| MetadataError::InvalidTimeout(format!("{value:?}")))?;
                batch.set_deadline(Deadline::after(parse_grpc_timeout(raw)?));
                continue;
            }

            let value = if is_binary_key(key) {
                decode_binary_value(key, value.as_bytes())?
            } else {
                Bytes::copy_from_slice(value.as_bytes())
            };
            batch.add_tail(ctx.intern(Bytes::copy_from_slice(key.as_bytes()), value));
        }
        Ok(batch)
    }
}

fn is_binary_key(key: &str) -> bool {
    key.ends_with(crate::element::BINARY_SUFFIX)
}

fn header_pair(element: &MetadataElement) -> Result<(HeaderName, HeaderValue), MetadataError> {
    let key_str = || String::from_utf8_lossy(element.key()).into_owned();

    let name = HeaderName::from_bytes(element.key())
        .map_err(|_| MetadataError::InvalidKey(key_str()))?;

    let value = match element.is_binary() {
        true => HeaderValue::try_from(encode_binary_value(element.value())),
        false => HeaderValue::from_bytes(element.value()),
    };
    let value = value.map_err(|e| {
        tracing::debug!(key = %key_str(), error = %e, "metadata value is not a valid header value");
        MetadataError::InvalidValue { key: key_str() }
    })?;

    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_to_header_map_keeps_order_of_repeated_keys() {
        let ctx = MetadataContext::new();
        let mut batch = MetadataBatch::new();
        batch.add_tail(ctx.intern("x-tag", "one"));
        batch.add_tail(ctx.intern("content-type", "application/grpc"));
        batch.add_tail(ctx.intern("x-tag", "two"));

        let headers = batch.to_header_map().unwrap();
        let tags: Vec<_> = headers.get_all("x-tag").iter().collect();
        assert_eq!(tags, ["one", "two"]);
        assert_eq!(headers["content-type"], "application/grpc");
        assert!(!headers.contains_key(GRPC_TIMEOUT_HEADER));
    }

    #[test]
    fn test_binary_values_are_base64_encoded() {
        let mut batch = MetadataBatch::new();
        batch.add_tail(MetadataElement::new("trace-bin", vec![0xde, 0xad, 0xbe, 0xef]));

        let headers = batch.to_header_map().unwrap();
        assert_eq!(headers["trace-bin"], "3q2+7w");
    }

    #[test]
    fn test_finite_deadline_becomes_grpc_timeout() {
        let mut batch = MetadataBatch::new();
        batch.set_deadline(Deadline::after(Duration::from_secs(10)));

        let headers = batch.to_header_map().unwrap();
        let timeout = parse_grpc_timeout(headers[GRPC_TIMEOUT_HEADER].to_str().unwrap()).unwrap();
        assert!(timeout <= Duration::from_secs(10));
        assert!(timeout > Duration::from_secs(9));
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        let mut batch = MetadataBatch::new();
        batch.add_tail(MetadataElement::new("Bad Key", "v"));

        assert!(matches!(
            batch.to_header_map(),
            Err(MetadataError::InvalidKey(key)) if key == "Bad Key"
        ));
    }

    #[test]
    fn test_invalid_value_is_rejected() {
        let mut batch = MetadataBatch::new();
        batch.add_tail(MetadataElement::new("x-text", "line\nbreak"));

        assert!(matches!(
            batch.to_header_map(),
            Err(MetadataError::InvalidValue { key }) if key == "x-text"
        ));
    }

    #[test]
    fn test_from_header_map_interns_and_reads_deadline() {
        let ctx = MetadataContext::new();
        let mut headers = HeaderMap::new();
        headers.append("x-tag", HeaderValue::from_static("one"));
        headers.append("x-tag", HeaderValue::from_static("two"));
        headers.insert("trace-bin", HeaderValue::from_static("3q2+7w=="));
        headers.insert(GRPC_TIMEOUT_HEADER, HeaderValue::from_static("5S"));

        let batch = MetadataBatch::from_header_map(&ctx, &headers).unwrap();

        assert_eq!(batch.len(), 3);
        assert!(!batch.deadline().is_infinite());
        assert!(batch.find(GRPC_TIMEOUT_HEADER).is_none());
        assert_eq!(batch.find("trace-bin").unwrap().value(), &[0xde, 0xad, 0xbe, 0xef][..]);
        let tags: Vec<_> = batch
            .iter()
            .filter(|e| e.key() == "x-tag")
            .map(|e| e.value().clone())
            .collect();
        assert_eq!(tags, ["one", "two"]);
        assert!(ctx.lookup(b"x-tag", b"one").is_some());
    }

    #[test]
    fn test_from_header_map_rejects_bad_input() {
        let ctx = MetadataContext::new();

        let mut headers = HeaderMap::new();
        headers.insert(GRPC_TIMEOUT_HEADER, HeaderValue::from_static("soon"));
        assert!(matches!(
            MetadataBatch::from_header_map(&ctx, &headers),
            Err(MetadataError::InvalidTimeout(_))
        ));

        let mut headers = HeaderMap::new();
        headers.insert("trace-bin", HeaderValue::from_static("***"));
        assert!(matches!(
            MetadataBatch::from_header_map(&ctx, &headers),
            Err(MetadataError::InvalidBinaryValue { .. })
        ));
    }

    #[test]
    fn test_header_round_trip_preserves_binary_bytes() {
        let ctx = MetadataContext::new();
        let mut batch = MetadataBatch::new();
        batch.add_tail(ctx.intern("payload-bin", vec![0u8, 255, 10, 13]));

        let headers = batch.to_header_map().unwrap();
        let decoded = MetadataBatch::from_header_map(&ctx, &headers).unwrap();

        assert_eq!(decoded.iter().next(), batch.iter().next());
    }
}
