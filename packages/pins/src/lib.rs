#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pinning keeps important incidents on screen after they scroll out of
//! the live feed window.
//!
//! [`policy`] decides which incidents deserve a pin and for how long;
//! [`engine::PinEngine`] applies that decision, persists pins with a
//! snapshot of each pinned incident, and expires them.

pub mod engine;
pub mod policy;

pub use engine::{PinEngine, UPDATE_THROTTLE};
pub use policy::{DefaultPinPolicy, PinPolicy};
