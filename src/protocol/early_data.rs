use base64::alphabet;
use base64::engine::{DecodePaddingMode, Engine as _, GeneralPurpose, GeneralPurposeConfig};
use bytes::Bytes;

use crate::utils::error::{GatewayError, Result};

/// URL-safe alphabet, padding optional: clients piggyback the first frame in
/// the `Sec-WebSocket-Protocol` header and usually strip the `=` padding.
const EARLY_DATA_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode the early-data header into the first chunk of the ingress stream.
/// An absent or empty header yields an empty buffer, not an error.
pub fn decode_early_data(header: &str) -> Result<Bytes> {
    if header.is_empty() {
        return Ok(Bytes::new());
    }
    EARLY_DATA_ENGINE
        .decode(header)
        .map(Bytes::from)
        .map_err(|e| GatewayError::EarlyData(e.to_string()))
}
