//! Protocol module: wire messages, the frame codec and the channel seam.

pub mod channel;
pub mod codec;
pub mod messages;
pub mod sequence;
pub mod transport;

pub use channel::{
    FinishedSignal, InputChannel, PublishError, Readiness, ReadinessSink, ReceiveError,
};
pub use codec::{decode_message, encode_message, CodecError};
pub use messages::*;
pub use sequence::{next_dispatch_seq, SequenceCounter};
pub use transport::{open_channel_pair, InputConsumer, LoopbackChannel, DEFAULT_CHANNEL_CAPACITY};
