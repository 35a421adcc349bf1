//! Input device registry and shared capture streams.
//!
//! # Primary API
//!
//! - [`DeviceRegistry`]: enumerate and classify input devices
//! - [`SharedStreamCache`]: one capture stream per device, fan-out taps
//! - [`ChannelMap`]: multichannel-to-stereo reduction
//!
//! Device enumeration fails soft (empty list) and stream opening walks a
//! three-tier ladder before giving up, so a missing or misbehaving device
//! degrades the station instead of crashing it.

pub mod error;
pub use error::{Error, Result};

mod device;
pub use device::{
    classify_label, AudioDeviceInfo, DeviceId, DeviceKind, DeviceRegistry, LOOPBACK_MARKERS,
};

mod negotiate;
pub use negotiate::{ChannelMap, Tier};

mod shared;
pub use shared::{SharedStream, SharedStreamCache, TapToken};
