//! NTLM message layout
//!
//! Binary layout of the three NTLMSSP messages exchanged during an HTTP
//! NTLM handshake. Only the client side is built here: the negotiate and
//! authenticate messages are serialized, the challenge message is parsed.
//! The reverse directions exist so fakes and loopback servers can speak the
//! protocol back to the client.

use crate::error::{Error, Result};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::io::{self, Read};

/// NTLM signature - "NTLMSSP\0"
pub const NTLMSSP_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_HEADER_LEN: usize = 32;
const CHALLENGE_HEADER_LEN: usize = 48;
const AUTHENTICATE_HEADER_LEN: usize = 64;

/// NTLM message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NtlmMessageType {
    /// Type 1: Negotiate message (client -> server)
    Negotiate = 0x00000001,
    /// Type 2: Challenge message (server -> client)
    Challenge = 0x00000002,
    /// Type 3: Authenticate message (client -> server)
    Authenticate = 0x00000003,
}

impl TryFrom<u32> for NtlmMessageType {
    type Error = Error;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0x00000001 => Ok(Self::Negotiate),
            0x00000002 => Ok(Self::Challenge),
            0x00000003 => Ok(Self::Authenticate),
            _ => Err(Error::ParseError(format!(
                "Invalid NTLM message type: {}",
                value
            ))),
        }
    }
}

bitflags! {
    /// NTLM negotiation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NtlmFlags: u32 {
        const NEGOTIATE_UNICODE = 0x00000001;
        const NEGOTIATE_OEM = 0x00000002;
        const REQUEST_TARGET = 0x00000004;
        const NEGOTIATE_SIGN = 0x00000010;
        const NEGOTIATE_SEAL = 0x00000020;
        const NEGOTIATE_LAN_MANAGER_KEY = 0x00000080;
        const NEGOTIATE_NTLM = 0x00000200;
        const NEGOTIATE_ANONYMOUS = 0x00000800;
        const NEGOTIATE_DOMAIN_SUPPLIED = 0x00001000;
        const NEGOTIATE_WORKSTATION_SUPPLIED = 0x00002000;
        const NEGOTIATE_ALWAYS_SIGN = 0x00008000;
        const TARGET_TYPE_DOMAIN = 0x00010000;
        const TARGET_TYPE_SERVER = 0x00020000;
        const NEGOTIATE_EXTENDED_SECURITY = 0x00080000;
        const NEGOTIATE_TARGET_INFO = 0x00800000;
        const NEGOTIATE_VERSION = 0x02000000;
        const NEGOTIATE_128 = 0x20000000;
        const NEGOTIATE_KEY_EXCHANGE = 0x40000000;
        const NEGOTIATE_56 = 0x80000000;
    }
}

impl NtlmFlags {
    /// Flags a client announces in its negotiate message.
    pub fn client_default() -> Self {
        NtlmFlags::NEGOTIATE_UNICODE
            | NtlmFlags::NEGOTIATE_OEM
            | NtlmFlags::REQUEST_TARGET
            | NtlmFlags::NEGOTIATE_NTLM
            | NtlmFlags::NEGOTIATE_ALWAYS_SIGN
            | NtlmFlags::NEGOTIATE_EXTENDED_SECURITY
            | NtlmFlags::NEGOTIATE_128
            | NtlmFlags::NEGOTIATE_56
    }

    /// Bits that only make sense when a session key is exchanged.
    /// HTTP authentication never establishes session security.
    pub fn session_security() -> Self {
        NtlmFlags::NEGOTIATE_SIGN | NtlmFlags::NEGOTIATE_SEAL | NtlmFlags::NEGOTIATE_KEY_EXCHANGE
    }
}

/// Security buffer descriptor: length, allocated length and offset of a
/// variable-length field relative to the start of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityBuffer {
    pub length: u16,
    pub max_length: u16,
    pub offset: u32,
}

impl SecurityBuffer {
    pub fn with_data(data_len: usize, offset: usize) -> Result<Self> {
        let length = u16::try_from(data_len)
            .map_err(|_| Error::ParseError(format!("NTLM field too long: {} bytes", data_len)))?;
        Ok(Self {
            length,
            max_length: length,
            offset: offset as u32,
        })
    }

    pub fn parse(cursor: &mut io::Cursor<&[u8]>) -> Result<Self> {
        Ok(Self {
            length: cursor.read_u16::<LittleEndian>()?,
            max_length: cursor.read_u16::<LittleEndian>()?,
            offset: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u16::<LittleEndian>(self.length)?;
        buf.write_u16::<LittleEndian>(self.max_length)?;
        buf.write_u32::<LittleEndian>(self.offset)?;
        Ok(())
    }

    pub fn extract_data<'a>(&self, message: &'a [u8]) -> Result<&'a [u8]> {
        let start = self.offset as usize;
        let end = start + self.length as usize;

        if end > message.len() {
            return Err(Error::ParseError(
                "Security buffer extends beyond message".into(),
            ));
        }

        Ok(&message[start..end])
    }
}

/// Lays out variable-length payload fields after a fixed header, handing
/// back the matching security buffer for each.
struct PayloadWriter {
    offset: usize,
    payload: Vec<u8>,
}

impl PayloadWriter {
    fn new(header_len: usize) -> Self {
        Self {
            offset: header_len,
            payload: Vec::new(),
        }
    }

    fn push(&mut self, data: &[u8]) -> Result<SecurityBuffer> {
        if data.is_empty() {
            return Ok(SecurityBuffer::default());
        }
        let buffer = SecurityBuffer::with_data(data.len(), self.offset)?;
        self.offset += data.len();
        self.payload.extend_from_slice(data);
        Ok(buffer)
    }
}

/// Encode a string as UTF-16LE or as OEM (here: uppercase ASCII bytes).
pub(crate) fn encode_string(value: &str, unicode: bool) -> Vec<u8> {
    if unicode {
        value.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
    } else {
        value.to_uppercase().into_bytes()
    }
}

fn decode_string(bytes: &[u8], unicode: bool) -> String {
    if unicode {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn read_header(cursor: &mut io::Cursor<&[u8]>, expected: NtlmMessageType) -> Result<()> {
    let mut signature = [0u8; 8];
    cursor.read_exact(&mut signature)?;
    if &signature != NTLMSSP_SIGNATURE {
        return Err(Error::ParseError("Invalid NTLM signature".into()));
    }

    let message_type = NtlmMessageType::try_from(cursor.read_u32::<LittleEndian>()?)?;
    if message_type != expected {
        return Err(Error::ParseError(format!(
            "Expected {:?} message, got {:?}",
            expected, message_type
        )));
    }
    Ok(())
}

fn write_header(buf: &mut Vec<u8>, message_type: NtlmMessageType) -> Result<()> {
    buf.extend_from_slice(NTLMSSP_SIGNATURE);
    buf.write_u32::<LittleEndian>(message_type as u32)?;
    Ok(())
}

/// NTLM Type 1 Message - Negotiate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmNegotiateMessage {
    pub flags: NtlmFlags,
    pub domain_name: String,
    pub workstation_name: String,
}

impl NtlmNegotiateMessage {
    pub fn new(domain: &str, workstation: &str) -> Self {
        let mut flags = NtlmFlags::client_default();
        if !domain.is_empty() {
            flags |= NtlmFlags::NEGOTIATE_DOMAIN_SUPPLIED;
        }
        if !workstation.is_empty() {
            flags |= NtlmFlags::NEGOTIATE_WORKSTATION_SUPPLIED;
        }

        Self {
            flags,
            domain_name: domain.to_string(),
            workstation_name: workstation.to_string(),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < NEGOTIATE_HEADER_LEN {
            return Err(Error::ParseError("NTLM negotiate message too short".into()));
        }

        let mut cursor = io::Cursor::new(data);
        read_header(&mut cursor, NtlmMessageType::Negotiate)?;

        let flags = NtlmFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let domain = SecurityBuffer::parse(&mut cursor)?;
        let workstation = SecurityBuffer::parse(&mut cursor)?;

        // Names in the negotiate message are always OEM
        Ok(Self {
            flags,
            domain_name: decode_string(domain.extract_data(data)?, false),
            workstation_name: decode_string(workstation.extract_data(data)?, false),
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut payload = PayloadWriter::new(NEGOTIATE_HEADER_LEN);
        let domain = payload.push(&encode_string(&self.domain_name, false))?;
        let workstation = payload.push(&encode_string(&self.workstation_name, false))?;

        let mut buf = Vec::with_capacity(NEGOTIATE_HEADER_LEN + payload.payload.len());
        write_header(&mut buf, NtlmMessageType::Negotiate)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        domain.serialize(&mut buf)?;
        workstation.serialize(&mut buf)?;
        buf.extend_from_slice(&payload.payload);

        Ok(buf)
    }
}

/// NTLM Type 2 Message - Challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmChallengeMessage {
    pub flags: NtlmFlags,
    pub server_challenge: [u8; 8],
    pub target_name: String,
    pub target_info: Vec<u8>,
}

impl NtlmChallengeMessage {
    pub fn new(target_name: &str, server_challenge: [u8; 8]) -> Self {
        Self {
            flags: NtlmFlags::NEGOTIATE_UNICODE
                | NtlmFlags::NEGOTIATE_NTLM
                | NtlmFlags::TARGET_TYPE_DOMAIN
                | NtlmFlags::NEGOTIATE_TARGET_INFO
                | NtlmFlags::NEGOTIATE_EXTENDED_SECURITY,
            server_challenge,
            target_name: target_name.to_string(),
            target_info: Vec::new(),
        }
    }

    pub fn unicode(&self) -> bool {
        self.flags.contains(NtlmFlags::NEGOTIATE_UNICODE)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < CHALLENGE_HEADER_LEN {
            return Err(Error::ParseError("NTLM challenge message too short".into()));
        }

        let mut cursor = io::Cursor::new(data);
        read_header(&mut cursor, NtlmMessageType::Challenge)?;

        let target_name = SecurityBuffer::parse(&mut cursor)?;
        let flags = NtlmFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?);

        let mut server_challenge = [0u8; 8];
        cursor.read_exact(&mut server_challenge)?;

        // Reserved context
        let _ = cursor.read_u64::<LittleEndian>()?;

        let target_info = SecurityBuffer::parse(&mut cursor)?;
        let unicode = flags.contains(NtlmFlags::NEGOTIATE_UNICODE);

        Ok(Self {
            flags,
            server_challenge,
            target_name: decode_string(target_name.extract_data(data)?, unicode),
            target_info: target_info.extract_data(data)?.to_vec(),
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut payload = PayloadWriter::new(CHALLENGE_HEADER_LEN);
        let target_name = payload.push(&encode_string(&self.target_name, self.unicode()))?;
        let target_info = payload.push(&self.target_info)?;

        let mut buf = Vec::with_capacity(CHALLENGE_HEADER_LEN + payload.payload.len());
        write_header(&mut buf, NtlmMessageType::Challenge)?;
        target_name.serialize(&mut buf)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        buf.extend_from_slice(&self.server_challenge);
        buf.write_u64::<LittleEndian>(0)?;
        target_info.serialize(&mut buf)?;
        buf.extend_from_slice(&payload.payload);

        Ok(buf)
    }
}

/// NTLM Type 3 Message - Authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmAuthenticateMessage {
    pub flags: NtlmFlags,
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain_name: String,
    pub user_name: String,
    pub workstation_name: String,
}

impl NtlmAuthenticateMessage {
    fn unicode(&self) -> bool {
        self.flags.contains(NtlmFlags::NEGOTIATE_UNICODE)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < AUTHENTICATE_HEADER_LEN {
            return Err(Error::ParseError(
                "NTLM authenticate message too short".into(),
            ));
        }

        let mut cursor = io::Cursor::new(data);
        read_header(&mut cursor, NtlmMessageType::Authenticate)?;

        let lm_response = SecurityBuffer::parse(&mut cursor)?;
        let nt_response = SecurityBuffer::parse(&mut cursor)?;
        let domain = SecurityBuffer::parse(&mut cursor)?;
        let user = SecurityBuffer::parse(&mut cursor)?;
        let workstation = SecurityBuffer::parse(&mut cursor)?;
        let _session_key = SecurityBuffer::parse(&mut cursor)?;
        let flags = NtlmFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let unicode = flags.contains(NtlmFlags::NEGOTIATE_UNICODE);

        Ok(Self {
            flags,
            lm_response: lm_response.extract_data(data)?.to_vec(),
            nt_response: nt_response.extract_data(data)?.to_vec(),
            domain_name: decode_string(domain.extract_data(data)?, unicode),
            user_name: decode_string(user.extract_data(data)?, unicode),
            workstation_name: decode_string(workstation.extract_data(data)?, unicode),
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let unicode = self.unicode();
        let mut payload = PayloadWriter::new(AUTHENTICATE_HEADER_LEN);
        let lm_response = payload.push(&self.lm_response)?;
        let nt_response = payload.push(&self.nt_response)?;
        let domain = payload.push(&encode_string(&self.domain_name, unicode))?;
        let user = payload.push(&encode_string(&self.user_name, unicode))?;
        let workstation = payload.push(&encode_string(&self.workstation_name, unicode))?;

        let mut buf = Vec::with_capacity(AUTHENTICATE_HEADER_LEN + payload.payload.len());
        write_header(&mut buf, NtlmMessageType::Authenticate)?;
        lm_response.serialize(&mut buf)?;
        nt_response.serialize(&mut buf)?;
        domain.serialize(&mut buf)?;
        user.serialize(&mut buf)?;
        workstation.serialize(&mut buf)?;
        // No encrypted session key
        SecurityBuffer {
            length: 0,
            max_length: 0,
            offset: payload.offset as u32,
        }
        .serialize(&mut buf)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        buf.extend_from_slice(&payload.payload);

        Ok(buf)
    }
}
