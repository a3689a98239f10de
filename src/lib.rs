pub mod bridge;
pub mod cache;
pub mod host;
pub mod language;
pub mod layout;
pub mod location;
pub mod time;

pub use bridge::{
    BridgeError, BridgeHandle, CapabilityRequest, CapabilityResponse, HostNotification,
    OrientationSnapshot, SystemTimeSnapshot,
};
pub use cache::{CacheStore, JsonFileStore, MemoryStore};
pub use host::{HostProvider, WindowBounds};
pub use language::LanguagePreference;
pub use layout::{layout_for, GridLayout};
pub use location::{LocationError, LocationRecord, LocationResolver};
pub use time::{TimeDisplay, TimeFormat, TimePanel};
