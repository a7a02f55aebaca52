//! Pure, synchronous decoders for hub telemetry.
//!
//! Nothing in this module performs I/O or keeps cross-connection state; the
//! per-connection pieces ([`FrameBuffer`], [`BpmGuesser`]) are owned by a
//! [`crate::pipeline::StreamDecoder`].

pub mod ant;
pub mod ble;
pub mod framing;
pub mod guesser;
pub mod hub900;
pub mod legacy;
pub mod text;
pub mod wire;

pub use ant::AntHeartRate;
pub use ble::{BleHeartRate, BleLayout};
pub use framing::{split_ant_serial, split_hdlc, split_hub900, AntSerialMessage, FrameBuffer, Framed};
pub use guesser::{BpmGuess, BpmGuesser, GuessNote};
pub use hub900::{HubFrame, HubFrameError, HubHeader, HubStatus};
pub use legacy::LegacyFrame;
