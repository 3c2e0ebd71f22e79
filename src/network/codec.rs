//! Stream framing for [`Message`]s

use crate::core::FormatError;
use crate::network::message::{peek_envelope, Message, ENVELOPE_SIZE};
use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

/// Message codec for enveloped framing
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.validate()?;
        dst.extend_from_slice(&item.serialize());
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((_, frame_len)) = peek_envelope(src)? else {
            src.reserve(ENVELOPE_SIZE - src.len());
            return Ok(None);
        };

        // Wait for the full frame
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        Ok(Some(Message::deserialize(&frame)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Block, InvVector};

    #[test]
    fn test_message_codec() {
        let mut codec = MessageCodec;
        let first = Message::Inv(vec![InvVector::block(Block::genesis_hash())]);
        let second = Message::Block(Block::genesis().clone());

        let mut buf = BytesMut::new();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        // Partial frame
        let mut partial = buf.split_to(ENVELOPE_SIZE + 3);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);
        let mut buf = partial;

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_bad_magic_is_an_error() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::from(&[0u8; ENVELOPE_SIZE][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::Format(FormatError::BadMagic))
        ));
    }
}
