//! Wire envelope and the decoding step between transports and the node.
//!
//! Every payload a transport carries is an encoded [`Message`]: a one byte
//! [`MessageType`] followed by the length-prefixed encoding of the value.

use crate::core::block::Block;
use crate::core::transaction::Transaction;
use crate::network::server::ServerError;
use crate::types::bytes::Bytes;
use crate::types::encoding::{Decode, DecodeError, Encode};
use ledger_derive::{BinaryCodec, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinaryCodec)]
pub enum MessageType {
    Transaction = 0x1,
    Block = 0x2,
}

impl TryFrom<u8> for MessageType {
    type Error = RpcError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x1 => Ok(MessageType::Transaction),
            0x2 => Ok(MessageType::Block),
            other => Err(RpcError::UnsupportedMessageType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("failed to decode message: {0}")]
    DecodeFailure(DecodeError),
    #[error("unsupported message type {0:#04x}")]
    UnsupportedMessageType(u8),
}

impl From<DecodeError> for RpcError {
    fn from(err: DecodeError) -> Self {
        RpcError::DecodeFailure(err)
    }
}

/// Framed message with a type header and an encoded body.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub struct Message {
    pub(crate) header: MessageType,
    pub(crate) data: Bytes,
}

impl Message {
    pub fn new(header: MessageType, data: impl Into<Bytes>) -> Self {
        Self {
            header,
            data: data.into(),
        }
    }

    pub fn transaction(tx: &Transaction) -> Self {
        Self::new(MessageType::Transaction, tx.to_bytes())
    }

    pub fn block(block: &Block) -> Self {
        Self::new(MessageType::Block, block.to_bytes())
    }

    pub fn header(&self) -> MessageType {
        self.header
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// A payload received from a peer, before decoding.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub struct Rpc {
    pub(crate) from: String,
    pub(crate) payload: Bytes,
}

impl Rpc {
    pub fn new(from: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            from: from.into(),
            payload: payload.into(),
        }
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Decoded payload, dispatched on by the node with an exhaustive match.
#[derive(Debug, Clone)]
pub enum DecodedMessageData {
    Transaction(Transaction),
    Block(Block),
}

#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub from: String,
    pub data: DecodedMessageData,
}

/// Turns a raw RPC into a typed message.
pub type DecodeRpcFn = fn(Rpc) -> Result<DecodedMessage, RpcError>;

/// Handles decoded messages in place of the node's built-in dispatch.
pub trait RpcProcessor: Send + Sync {
    fn process_message(&self, message: DecodedMessage) -> Result<(), ServerError>;
}

/// Decoder used unless the node is configured with another one.
///
/// The type byte is checked before anything else so unknown message kinds
/// are reported as such rather than as a generic decode failure.
pub fn default_decode_rpc(rpc: Rpc) -> Result<DecodedMessage, RpcError> {
    let tag = *rpc
        .payload
        .first()
        .ok_or(RpcError::DecodeFailure(DecodeError::UnexpectedEof))?;
    MessageType::try_from(tag)?;

    let message = Message::from_bytes(rpc.payload.as_slice())?;
    let data = match message.header {
        MessageType::Transaction => {
            DecodedMessageData::Transaction(Transaction::from_bytes(message.data.as_slice())?)
        }
        MessageType::Block => DecodedMessageData::Block(Block::from_bytes(message.data.as_slice())?),
    };

    Ok(DecodedMessage {
        from: rpc.from,
        data,
    })
}
