//! NTLMv2 response computation

use crate::error::{Error, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacMd5 = Hmac<Md5>;

/// 100ns intervals between 1601-01-01 and 1970-01-01
const WINDOWS_EPOCH_DIFF: u64 = 116_444_736_000_000_000;

fn utf16le(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

pub(crate) fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
    let mut mac = HmacMd5::new_from_slice(key)
        .map_err(|e| Error::CryptoError(format!("HMAC error: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

/// NT hash: MD4 of the UTF-16LE password
pub fn ntlm_hash(password: &str) -> [u8; 16] {
    let mut hasher = Md4::new();
    hasher.update(utf16le(password));
    let mut hash = [0u8; 16];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

/// NTOWFv2: HMAC-MD5(NT hash, UTF-16LE(uppercase(user) + domain))
pub fn ntlmv2_hash(username: &str, domain: &str, password: &str) -> Result<Vec<u8>> {
    let identity = utf16le(&format!("{}{}", username.to_uppercase(), domain));
    hmac_md5(&ntlm_hash(password), &[&identity[..]])
}

/// LMv2 response: HMAC-MD5(v2 hash, server challenge + client challenge) + client challenge
pub fn lmv2_response(
    ntlmv2_hash: &[u8],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
) -> Result<Vec<u8>> {
    let mut response = hmac_md5(ntlmv2_hash, &[&server_challenge[..], &client_challenge[..]])?;
    response.extend_from_slice(client_challenge);
    Ok(response)
}

/// Client blob hashed into the NTLMv2 response
#[derive(Debug, Clone)]
pub struct NtlmV2Blob {
    pub timestamp: u64,
    pub client_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl NtlmV2Blob {
    pub fn new(timestamp: u64, client_challenge: [u8; 8], target_info: Vec<u8>) -> Self {
        Self {
            timestamp,
            client_challenge,
            target_info,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut blob = Vec::with_capacity(32 + self.target_info.len());

        // Signature + reserved
        blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
        blob.extend_from_slice(&[0x00; 4]);
        blob.write_u64::<LittleEndian>(self.timestamp)?;
        blob.extend_from_slice(&self.client_challenge);
        blob.extend_from_slice(&[0x00; 4]);
        blob.extend_from_slice(&self.target_info);
        blob.extend_from_slice(&[0x00; 4]);

        Ok(blob)
    }
}

/// NTLMv2 response: NTProofStr + blob
pub fn ntlmv2_response(
    ntlmv2_hash: &[u8],
    server_challenge: &[u8; 8],
    blob: &NtlmV2Blob,
) -> Result<Vec<u8>> {
    let blob_bytes = blob.to_bytes()?;
    let mut response = hmac_md5(ntlmv2_hash, &[&server_challenge[..], &blob_bytes[..]])?;
    response.extend_from_slice(&blob_bytes);
    Ok(response)
}

pub fn generate_client_challenge() -> [u8; 8] {
    let mut challenge = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

/// Current time in 100ns intervals since 1601-01-01
pub fn windows_timestamp() -> u64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    duration.as_secs() * 10_000_000 + duration.subsec_nanos() as u64 / 100 + WINDOWS_EPOCH_DIFF
}
