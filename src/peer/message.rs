use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TorrentError};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
}

impl TryFrom<u8> for MessageId {
    type Error = ();

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Choke),
            1 => Ok(Self::Unchoke),
            2 => Ok(Self::Interested),
            3 => Ok(Self::NotInterested),
            4 => Ok(Self::Have),
            5 => Ok(Self::Bitfield),
            6 => Ok(Self::Request),
            7 => Ok(Self::Piece),
            8 => Ok(Self::Cancel),
            9 => Ok(Self::Port),
            _ => Err(()),
        }
    }
}

/// One framed peer wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have {
        piece_index: u32,
    },
    Bitfield(Bitfield),
    Request {
        index: u32,
        begin: u32,
        length: u32,
    },
    Piece {
        index: u32,
        begin: u32,
        block: Bytes,
    },
    Cancel {
        index: u32,
        begin: u32,
        length: u32,
    },
    Port(u16),
    /// An id this client does not know; the payload was skipped.
    Unknown {
        id: u8,
        length: usize,
    },
}

impl Message {
    pub fn id(&self) -> Option<u8> {
        let id = match self {
            Message::KeepAlive => return None,
            Message::Choke => MessageId::Choke,
            Message::Unchoke => MessageId::Unchoke,
            Message::Interested => MessageId::Interested,
            Message::NotInterested => MessageId::NotInterested,
            Message::Have { .. } => MessageId::Have,
            Message::Bitfield(_) => MessageId::Bitfield,
            Message::Request { .. } => MessageId::Request,
            Message::Piece { .. } => MessageId::Piece,
            Message::Cancel { .. } => MessageId::Cancel,
            Message::Port(_) => MessageId::Port,
            Message::Unknown { id, .. } => return Some(*id),
        };
        Some(id as u8)
    }

    /// Decode a frame body, i.e. the `length` bytes following the length
    /// prefix. An empty body is a keep-alive.
    ///
    /// # Errors
    /// `MalformedMessage` when a known id carries a payload of the wrong size.
    pub fn decode(mut body: Bytes) -> Result<Self> {
        if body.is_empty() {
            return Ok(Message::KeepAlive);
        }

        let raw_id = body.get_u8();
        let Ok(id) = MessageId::try_from(raw_id) else {
            return Ok(Message::Unknown {
                id: raw_id,
                length: body.len(),
            });
        };

        let expected = match id {
            MessageId::Choke
            | MessageId::Unchoke
            | MessageId::Interested
            | MessageId::NotInterested => Some(0),
            MessageId::Have => Some(4),
            MessageId::Request | MessageId::Cancel => Some(12),
            MessageId::Port => Some(2),
            MessageId::Bitfield | MessageId::Piece => None,
        };
        let malformed = match expected {
            Some(len) => body.len() != len,
            None => id == MessageId::Piece && body.len() < 8,
        };
        if malformed {
            return Err(TorrentError::MalformedMessage {
                id: raw_id,
                length: body.len(),
            });
        }

        let message = match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => Message::Have {
                piece_index: body.get_u32(),
            },
            MessageId::Bitfield => Message::Bitfield(Bitfield {
                bits: body.to_vec(),
            }),
            MessageId::Request => Message::Request {
                index: body.get_u32(),
                begin: body.get_u32(),
                length: body.get_u32(),
            },
            MessageId::Piece => Message::Piece {
                index: body.get_u32(),
                begin: body.get_u32(),
                block: body,
            },
            MessageId::Cancel => Message::Cancel {
                index: body.get_u32(),
                begin: body.get_u32(),
                length: body.get_u32(),
            },
            MessageId::Port => Message::Port(body.get_u16()),
        };
        Ok(message)
    }

    /// Length-prefixed wire form.
    ///
    /// `Unknown` messages are written with a zeroed payload of their recorded length.
    pub fn serialize(&self) -> BytesMut {
        let mut payload = BytesMut::new();
        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
            Message::Have { piece_index } => payload.put_u32(*piece_index),
            Message::Bitfield(bitfield) => payload.put_slice(&bitfield.bits),
            Message::Request {
                index,
                begin,
                length,
            }
            | Message::Cancel {
                index,
                begin,
                length,
            } => {
                payload.put_u32(*index);
                payload.put_u32(*begin);
                payload.put_u32(*length);
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                payload.put_u32(*index);
                payload.put_u32(*begin);
                payload.put_slice(block);
            }
            Message::Port(port) => payload.put_u16(*port),
            Message::Unknown { length, .. } => payload.put_bytes(0, *length),
        }

        let mut buf = BytesMut::with_capacity(5 + payload.len());
        match self.id() {
            None => buf.put_u32(0),
            Some(id) => {
                buf.put_u32(1 + payload.len() as u32); // 1 byte for ID
                buf.put_u8(id);
                buf.put_slice(&payload);
            }
        }
        buf
    }
}

/// A peer's "own pieces" bitmap, most significant bit first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    pub bits: Vec<u8>, // raw bytes
}

impl Bitfield {
    /// Number of pieces the peer reports having.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }
}
