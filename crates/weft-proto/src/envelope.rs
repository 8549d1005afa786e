//! Signal envelope and ICE credential codec.
//!
//! The signaling relay is a dumb ordered channel: it routes an envelope from
//! `key` to `remote_key` without inspecting the body. The body is a small
//! tagged payload carrying one of three things:
//!
//! - `Offer` / `Answer`: the sender's ICE credentials (ufrag + pwd)
//! - `Candidate`: the canonical text form of one ICE candidate
//!
//! Credentials use a length-prefixed binary layout so the relay and codec
//! never need to agree on escaping rules:
//!
//! ```text
//! [ufrag_len: u16 BE][ufrag bytes][pwd_len: u16 BE][pwd bytes]
//! ```
//!
//! Unknown body kind tags fail decoding with
//! [`ProtocolError::UnknownBodyKind`]; receivers are expected to drop and log
//! such messages rather than tear the stream down.

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};

/// Hard cap on a signal body payload.
///
/// Credentials and candidates are tiny; anything near this limit is a broken
/// or malicious sender.
pub const MAX_BODY_SIZE: usize = 64 * 1024;

/// Discriminates the payload carried by a [`SignalBody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BodyKind {
    /// ICE credentials from the controlling side
    Offer = 0,
    /// ICE credentials from the controlled side
    Answer = 1,
    /// One ICE candidate in canonical text form
    Candidate = 2,
}

impl BodyKind {
    /// Parse a wire tag. Returns `None` for unknown tags so callers can
    /// decide between dropping and erroring.
    #[must_use]
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Offer),
            1 => Some(Self::Answer),
            2 => Some(Self::Candidate),
            _ => None,
        }
    }

    /// Wire tag for this kind.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Tagged payload of a signal message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalBody {
    /// What the payload contains
    pub kind: BodyKind,
    /// Raw payload bytes (credential layout or candidate text)
    pub payload: Bytes,
}

impl SignalBody {
    /// Assemble a body from a wire tag and payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownBodyKind`] for unrecognized tags and
    /// [`ProtocolError::PayloadTooLarge`] when the payload exceeds
    /// [`MAX_BODY_SIZE`].
    pub fn decode(tag: u8, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: payload.len(), max: MAX_BODY_SIZE });
        }
        let kind = BodyKind::from_u8(tag).ok_or(ProtocolError::UnknownBodyKind(tag))?;
        Ok(Self { kind, payload })
    }
}

/// A signal message addressed from one peer to another.
///
/// `key` is the sender's tunnel public key, `remote_key` the receiver's.
/// The relay routes on `remote_key` only; the receiver must verify that
/// `remote_key` names itself before acting on the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEnvelope {
    /// Sender's public key
    pub key: String,
    /// Intended receiver's public key
    pub remote_key: String,
    /// Tagged payload
    pub body: SignalBody,
}

impl SignalEnvelope {
    /// Build an OFFER envelope carrying the sender's ICE credentials.
    #[must_use]
    pub fn offer(key: impl Into<String>, remote_key: impl Into<String>, credentials: &IceCredentials) -> Self {
        Self {
            key: key.into(),
            remote_key: remote_key.into(),
            body: SignalBody { kind: BodyKind::Offer, payload: credentials.encode() },
        }
    }

    /// Build an ANSWER envelope carrying the sender's ICE credentials.
    #[must_use]
    pub fn answer(key: impl Into<String>, remote_key: impl Into<String>, credentials: &IceCredentials) -> Self {
        Self {
            key: key.into(),
            remote_key: remote_key.into(),
            body: SignalBody { kind: BodyKind::Answer, payload: credentials.encode() },
        }
    }

    /// Build a CANDIDATE envelope carrying one candidate's text form.
    #[must_use]
    pub fn candidate(key: impl Into<String>, remote_key: impl Into<String>, candidate: &str) -> Self {
        Self {
            key: key.into(),
            remote_key: remote_key.into(),
            body: SignalBody {
                kind: BodyKind::Candidate,
                payload: Bytes::copy_from_slice(candidate.as_bytes()),
            },
        }
    }

    /// Extract the candidate text from a CANDIDATE body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidUtf8`] when the payload is not text.
    pub fn candidate_text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body.payload)
            .map_err(|_| ProtocolError::InvalidUtf8 { field: "candidate" })
    }
}

/// ICE username fragment and password, exchanged in offers and answers.
#[derive(Clone, PartialEq, Eq)]
pub struct IceCredentials {
    /// Username fragment
    pub ufrag: String,
    /// Password
    pub pwd: String,
}

impl std::fmt::Debug for IceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The password authenticates connectivity checks; keep it out of logs.
        f.debug_struct("IceCredentials")
            .field("ufrag", &self.ufrag)
            .field("pwd", &format!("<redacted {} bytes>", self.pwd.len()))
            .finish()
    }
}

impl IceCredentials {
    /// Encode to the length-prefixed wire layout.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.ufrag.len() + self.pwd.len());
        put_field(&mut buf, self.ufrag.as_bytes());
        put_field(&mut buf, self.pwd.as_bytes());
        buf.freeze()
    }

    /// Decode from the length-prefixed wire layout.
    ///
    /// Trailing bytes after the second field are rejected as truncation in
    /// reverse: a sender that appends data is speaking a different protocol.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] on short input or trailing bytes,
    /// [`ProtocolError::InvalidUtf8`] if either field is not valid UTF-8.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (ufrag_raw, rest) = take_field(bytes)?;
        let (pwd_raw, rest) = take_field(rest)?;
        if !rest.is_empty() {
            return Err(ProtocolError::Truncated {
                expected: bytes.len() - rest.len(),
                actual: bytes.len(),
            });
        }

        let ufrag = std::str::from_utf8(ufrag_raw)
            .map_err(|_| ProtocolError::InvalidUtf8 { field: "ufrag" })?
            .to_string();
        let pwd = std::str::from_utf8(pwd_raw)
            .map_err(|_| ProtocolError::InvalidUtf8 { field: "pwd" })?
            .to_string();

        Ok(Self { ufrag, pwd })
    }
}

fn put_field(buf: &mut BytesMut, field: &[u8]) {
    // RFC 8445 bounds ufrag and pwd at 256 characters each, so u16 lengths
    // cannot overflow for any well-formed credential.
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u16(field.len() as u16);
    buf.put_slice(field);
}

fn take_field(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    if bytes.len() < 2 {
        return Err(ProtocolError::Truncated { expected: 2, actual: bytes.len() });
    }
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let rest = &bytes[2..];
    if rest.len() < len {
        return Err(ProtocolError::Truncated { expected: len, actual: rest.len() });
    }
    Ok((&rest[..len], &rest[len..]))
}
