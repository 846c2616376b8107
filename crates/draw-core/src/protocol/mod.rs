//! Wire formats: command encoders, reply decoders, and the socket codec.

pub mod codec;
pub mod commands;
pub mod ids;
pub mod info;
pub mod mouse;
pub mod wsysmsg;

pub use codec::ProtocolError;
pub use ids::ResourceIds;
pub use info::{InfoBlock, INFO_SIZE};
pub use mouse::{parse_mouse_record, read_mouse_record, Mouse, MouseEvent};
pub use wsysmsg::{decode_wsysmsg, encode_wsysmsg, Body, MessageType, Wsysmsg};
