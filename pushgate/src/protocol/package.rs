//! Package framing: one type byte, a 24-bit big-endian body length, then the body.

use crate::protocol::{ProtocolError, Result};
use crate::wire::Reader;

const HEADER_LEN: usize = 4;
const MAX_BODY_LEN: usize = 0x00ff_ffff;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum PackageType {
    Handshake = 1,
    HandshakeAck = 2,
    Heartbeat = 3,
    Data = 4,
    Kick = 5,
}

impl TryFrom<u8> for PackageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Handshake),
            2 => Ok(Self::HandshakeAck),
            3 => Ok(Self::Heartbeat),
            4 => Ok(Self::Data),
            5 => Ok(Self::Kick),
            other => Err(ProtocolError::InvalidPackageType(other)),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Package {
    pub kind: PackageType,
    pub body: Vec<u8>,
}

impl Package {
    pub fn new(kind: PackageType, body: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_package(self.kind, &self.body)
    }
}

pub fn encode_package(kind: PackageType, body: &[u8]) -> Result<Vec<u8>> {
    if body.len() > MAX_BODY_LEN {
        return Err(ProtocolError::BodyTooLarge(body.len()));
    }
    let len = body.len() as u32;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.push(kind as u8);
    out.extend_from_slice(&len.to_be_bytes()[1..]);
    out.extend_from_slice(body);
    Ok(out)
}

/// Splits a datagram into every package it carries.
pub fn decode_packages(bytes: &[u8]) -> Result<Vec<Package>> {
    let mut reader = Reader::new(bytes);
    let mut packages = Vec::new();
    while !reader.is_empty() {
        let kind = PackageType::try_from(reader.read_u8()?)?;
        let header = reader.read_bytes(3)?;
        let len = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
        let body = reader.read_bytes(len)?;
        packages.push(Package::new(kind, body));
    }
    Ok(packages)
}
