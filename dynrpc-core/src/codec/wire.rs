use super::CodecError;
use bytes::{Buf, BufMut, Bytes};
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// Encodes a message with the standard Protobuf binary encoding.
///
/// Unknown fields retained from a previous [`from_wire`] are written back out.
pub fn to_wire(message: &DynamicMessage) -> Vec<u8> {
    message.encode_to_vec()
}

/// Decodes Protobuf binary bytes into a message of type `desc`.
pub fn from_wire(desc: MessageDescriptor, bytes: &[u8]) -> Result<DynamicMessage, CodecError> {
    DynamicMessage::decode(desc, bytes).map_err(|e| CodecError::WireDecode {
        message: e.to_string(),
    })
}

/// A pass-through `tonic` codec for frames that are already encoded.
///
/// Transcoding happens on the caller side, so a malformed request or response surfaces as a
/// [`CodecError`] instead of a transport status.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec;

impl Codec for WireCodec {
    type Encode = Bytes;
    type Decode = Bytes;

    type Encoder = WireCodec;
    type Decoder = WireCodec;

    fn encoder(&mut self) -> Self::Encoder {
        WireCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        WireCodec
    }
}

impl Encoder for WireCodec {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put(item);
        Ok(())
    }
}

impl Decoder for WireCodec {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Some(src.copy_to_bytes(src.remaining())))
    }
}
