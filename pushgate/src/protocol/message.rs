//! Message framing carried inside data packages.
//!
//! The flag byte is `(type << 1) | compressed`. Requests and responses carry a
//! varint id; requests, notifies and pushes carry a route, either as a 2-byte
//! dictionary code or as a length-prefixed string. The rest is the body.

use crate::protocol::{ProtocolError, Result};
use crate::wire::{write_varint, Reader};

const ROUTE_COMPRESSED: u8 = 0x01;
const MAX_ROUTE_LEN: usize = 0xff;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Notify = 1,
    Response = 2,
    Push = 3,
}

impl MessageType {
    fn has_id(self) -> bool {
        matches!(self, MessageType::Request | MessageType::Response)
    }

    fn has_route(self) -> bool {
        !matches!(self, MessageType::Response)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Notify),
            2 => Ok(Self::Response),
            3 => Ok(Self::Push),
            other => Err(ProtocolError::InvalidMessageType(other)),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MessageRoute {
    Code(u16),
    Name(String),
    None,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub kind: MessageType,
    pub id: u64,
    pub route: MessageRoute,
    pub body: Vec<u8>,
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let compressed = matches!(self.route, MessageRoute::Code(_));
        let mut out = Vec::with_capacity(self.body.len() + 8);
        out.push(((self.kind as u8) << 1) | u8::from(compressed));

        if self.kind.has_id() {
            write_varint(&mut out, self.id);
        }

        if self.kind.has_route() {
            match &self.route {
                MessageRoute::Code(code) => out.extend_from_slice(&code.to_be_bytes()),
                MessageRoute::Name(name) => {
                    if name.len() > MAX_ROUTE_LEN {
                        return Err(ProtocolError::RouteTooLong(name.len()));
                    }
                    out.push(name.len() as u8);
                    out.extend_from_slice(name.as_bytes());
                }
                MessageRoute::None => return Err(ProtocolError::MissingRoute(self.kind)),
            }
        }

        out.extend_from_slice(&self.body);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let flag = reader.read_u8()?;
        let kind = MessageType::try_from((flag >> 1) & 0x07)?;

        let id = if kind.has_id() { reader.read_varint()? } else { 0 };

        let route = if !kind.has_route() {
            MessageRoute::None
        } else if flag & ROUTE_COMPRESSED != 0 {
            let code = reader.read_bytes(2)?;
            MessageRoute::Code(u16::from_be_bytes([code[0], code[1]]))
        } else {
            let len = reader.read_u8()? as usize;
            let name = reader.read_bytes(len)?;
            MessageRoute::Name(String::from_utf8(name.to_vec())?)
        };

        Ok(Self {
            kind,
            id,
            route,
            body: reader.remaining().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_with_compressed_route() {
        let message = Message {
            kind: MessageType::Request,
            id: 300,
            route: MessageRoute::Code(2),
            body: b"{}".to_vec(),
        };
        let bytes = message.encode().expect("encodes");
        assert_eq!(bytes, vec![0x01, 0xac, 0x02, 0x00, 0x02, b'{', b'}']);
        assert_eq!(Message::decode(&bytes).expect("decodes"), message);
    }

    #[test]
    fn push_carries_route_name_without_id() {
        let message = Message {
            kind: MessageType::Push,
            id: 0,
            route: MessageRoute::Name("onChat".to_string()),
            body: vec![1, 2, 3],
        };
        let bytes = message.encode().expect("encodes");
        assert_eq!(bytes[0], 0x06);
        assert_eq!(bytes[1], 6);
        assert_eq!(Message::decode(&bytes).expect("decodes"), message);
    }

    #[test]
    fn response_has_id_and_no_route() {
        let message = Message {
            kind: MessageType::Response,
            id: 7,
            route: MessageRoute::None,
            body: Vec::new(),
        };
        let bytes = message.encode().expect("encodes");
        assert_eq!(bytes, vec![0x04, 0x07]);
        assert_eq!(Message::decode(&bytes).expect("decodes"), message);
    }

    #[test]
    fn overlong_route_name_is_refused() {
        let message = Message {
            kind: MessageType::Notify,
            id: 0,
            route: MessageRoute::Name("r".repeat(256)),
            body: Vec::new(),
        };
        assert!(matches!(
            message.encode(),
            Err(ProtocolError::RouteTooLong(256))
        ));
    }

    #[test]
    fn truncated_route_is_reported() {
        assert!(matches!(
            Message::decode(&[0x02, 5, b'a']),
            Err(ProtocolError::Truncated)
        ));
        assert!(matches!(
            Message::decode(&[0x0e]),
            Err(ProtocolError::InvalidMessageType(7))
        ));
    }
}
