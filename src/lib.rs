//! Vision-model desktop automation: capture the screen, ask a multimodal
//! model for the next step, decode its answer into one canonical action,
//! resolve coordinates onto the device, execute, and verify the effect.

pub mod action;
pub mod config;
pub mod coords;
pub mod decode;
pub mod errors;
pub mod input;
pub mod provider;
pub mod screen;
pub mod stepper;
pub mod targeting;
pub mod verify;

pub use errors::{DeskDriverError, DeskDriverResult};
