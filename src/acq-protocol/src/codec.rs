// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Line codec for envelopes, watch control messages and responses.

use crate::types::{ClientCommand, ClientEnvelope, ClientResponse, WatchControl};

/// Parse a JSON string into a ClientEnvelope.
///
/// First tries to parse as a full ClientEnvelope.
/// If that fails, tries to parse as a bare ClientCommand and wraps it with token: None.
pub fn parse_envelope(input: &str) -> Result<ClientEnvelope, serde_json::Error> {
    match serde_json::from_str::<ClientEnvelope>(input) {
        Ok(envelope) => Ok(envelope),
        Err(_) => {
            let cmd = serde_json::from_str::<ClientCommand>(input)?;
            Ok(ClientEnvelope { token: None, cmd })
        }
    }
}

/// Parse a line received while a watch is streaming.
pub fn parse_watch_control(input: &str) -> Result<WatchControl, serde_json::Error> {
    serde_json::from_str(input.trim())
}

/// Serialize a response as one newline-terminated line.
pub fn encode_response(resp: &ClientResponse) -> Result<String, serde_json::Error> {
    Ok(serde_json::to_string(resp)? + "\n")
}
