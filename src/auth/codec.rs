//! NTLM token codec
//!
//! Turns credentials and server challenges into `Authorization` header
//! values. The handshake only depends on the [`NtlmCodec`] trait;
//! [`NtlmV2Codec`] is the implementation shipped with the crate.

use crate::auth::credentials::Credentials;
use crate::auth::ntlm::{
    NtlmAuthenticateMessage, NtlmChallengeMessage, NtlmFlags, NtlmNegotiateMessage,
};
use crate::auth::ntlm_crypto::{
    generate_client_challenge, lmv2_response, ntlmv2_hash, ntlmv2_response, windows_timestamp,
    NtlmV2Blob,
};
use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Scheme prefix of NTLM `Authorization` / `www-authenticate` values
pub const NTLM_SCHEME: &str = "NTLM";

/// AV pair id of the server timestamp in the challenge target info
const MSV_AV_TIMESTAMP: u16 = 0x0007;
const MSV_AV_EOL: u16 = 0x0000;

/// Encodes and decodes the three NTLM messages as HTTP header values.
pub trait NtlmCodec: Send + Sync {
    /// Build the `Authorization` value carrying the type 1 message.
    fn create_negotiate_message(&self, credentials: &Credentials) -> Result<String>;

    /// Decode the type 2 message from a `www-authenticate` value.
    fn parse_challenge_message(&self, header_value: &str) -> Result<NtlmChallengeMessage>;

    /// Build the `Authorization` value carrying the type 3 message.
    fn create_authenticate_message(
        &self,
        challenge: &NtlmChallengeMessage,
        credentials: &Credentials,
    ) -> Result<String>;
}

/// NTLMv2 codec with base64 `NTLM <token>` header values.
#[derive(Debug, Clone, Copy, Default)]
pub struct NtlmV2Codec;

impl NtlmV2Codec {
    pub fn new() -> Self {
        Self
    }
}

/// Render raw NTLM message bytes as an `NTLM <base64>` header value.
pub fn encode_token(message: &[u8]) -> String {
    format!("{} {}", NTLM_SCHEME, BASE64.encode(message))
}

/// Extract and decode the NTLM token from a header value such as
/// `NTLM TlRMTVNT...` or `Negotiate, NTLM TlRMTVNT...`.
pub fn decode_token(header_value: &str) -> Result<Vec<u8>> {
    let token = header_value
        .split(',')
        .map(str::trim)
        .find_map(|mechanism| {
            let (scheme, token) = mechanism.split_once(' ')?;
            scheme.eq_ignore_ascii_case(NTLM_SCHEME).then(|| token.trim())
        })
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            Error::InvalidChallenge(format!("no NTLM token in header: {}", header_value))
        })?;

    Ok(BASE64.decode(token)?)
}

/// Server timestamp from the challenge target info, if the server sent one.
fn server_timestamp(target_info: &[u8]) -> Option<u64> {
    let mut rest = target_info;
    while rest.len() >= 4 {
        let id = u16::from_le_bytes([rest[0], rest[1]]);
        let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        let value = rest.get(4..4 + len)?;
        match id {
            MSV_AV_EOL => return None,
            MSV_AV_TIMESTAMP if len == 8 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(value);
                return Some(u64::from_le_bytes(bytes));
            }
            _ => rest = &rest[4 + len..],
        }
    }
    None
}

impl NtlmCodec for NtlmV2Codec {
    fn create_negotiate_message(&self, credentials: &Credentials) -> Result<String> {
        let message =
            NtlmNegotiateMessage::new(credentials.domain(), credentials.workstation()).serialize()?;
        Ok(encode_token(&message))
    }

    fn parse_challenge_message(&self, header_value: &str) -> Result<NtlmChallengeMessage> {
        NtlmChallengeMessage::parse(&decode_token(header_value)?)
    }

    fn create_authenticate_message(
        &self,
        challenge: &NtlmChallengeMessage,
        credentials: &Credentials,
    ) -> Result<String> {
        let hash = ntlmv2_hash(
            credentials.username(),
            credentials.domain(),
            credentials.password(),
        )?;

        let client_challenge = generate_client_challenge();
        let server_time = server_timestamp(&challenge.target_info);
        let timestamp = server_time.unwrap_or_else(windows_timestamp);
        let blob = NtlmV2Blob::new(timestamp, client_challenge, challenge.target_info.clone());

        // With a server timestamp the LM response is sent zero-filled
        let lm_response = match server_time {
            Some(_) => vec![0u8; 24],
            None => lmv2_response(&hash, &challenge.server_challenge, &client_challenge)?,
        };

        let message = NtlmAuthenticateMessage {
            flags: challenge.flags - NtlmFlags::session_security(),
            lm_response,
            nt_response: ntlmv2_response(&hash, &challenge.server_challenge, &blob)?,
            domain_name: credentials.domain().to_string(),
            user_name: credentials.username().to_string(),
            workstation_name: credentials.workstation().to_string(),
        };

        Ok(encode_token(&message.serialize()?))
    }
}
