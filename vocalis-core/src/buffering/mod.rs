//! Frame buffering between the synthesis worker and the audio pull thread.
//!
//! [`FrameRingBuffer`] is the only synchronization point between the two.
//! [`channels`] holds the channel-count conversions applied before frames
//! enter the buffer or the earcon store.

pub mod channels;
pub mod ring;

pub use channels::ChannelMap;
pub use ring::FrameRingBuffer;
