//! Protocol module containing message types and the text codec.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_broadcast, decode_inbound, decode_reply, encode_broadcast, encode_inbound,
    encode_reply, parse_status_line, ProtocolError,
};
pub use messages::*;
