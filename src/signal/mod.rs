//! Change notification between independently mounted consumers.
//!
//! Two fan-out channels live on one `SignalBus`:
//!
//! - the same-tab channel carries named, payload-free signals
//!   (`FavoritesChanged`, `StatsChanged`) that mutating code emits right
//!   after a successful durable write
//! - the cross-tab channel carries `StorageEvent`s mirroring the
//!   platform's storage notification, which fires only in *other*
//!   contexts than the writer's
//!
//! Signals carry no payload on purpose: listeners re-read the durable
//! store themselves, so there is nothing to go stale between the signal
//! and the data.

pub mod bus;

pub use bus::{Signal, SignalBus, StorageEvent, Subscription};
