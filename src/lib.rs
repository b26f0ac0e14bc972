/*! Host-side shadow validation of WebGPU command recording.
 *
 *  The crate keeps a shadow record for every object a host creates through a
 *  WebGPU-style API and checks each recording call against that state before
 *  the call reaches a real device. All state lives in a [`ValidationContext`];
 *  the host calls into it at the point it is about to issue the real call and
 *  associates the returned ids with its own objects.
 */

#![allow(
    // It is much clearer to assert negative conditions with eq! false
    clippy::bool_assert_comparison,
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Needless updates are more scaleable, easier to play with features.
    clippy::needless_update,
    // Need many arguments for some core functions to be able to re-use code in many situations.
    clippy::too_many_arguments,
    // Clashes with clippy::pattern_type_mismatch
    clippy::needless_borrowed_reference,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub mod binding_model;
pub mod command;
pub mod device;
pub mod error;
pub mod format;
pub mod global;
pub mod hub;
pub mod id;
pub mod pipeline;
pub mod resource;
mod storage;
pub mod validation;

pub use device::Limits;
pub use error::{Error, ErrorKind, ErrorSink, LogSink};
pub use global::ValidationContext;
pub use storage::StorageReport;

use std::borrow::Cow;

/// Maximum number of bind groups the engine can track per encoder.
pub const MAX_BIND_GROUPS: usize = 8;
/// Maximum number of vertex buffer slots the engine can track per encoder.
pub const MAX_VERTEX_BUFFERS: usize = 16;
/// Maximum number of color attachments in a pass or bundle.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

type Index = u32;
type Epoch = u32;

pub type Label<'a> = Option<Cow<'a, str>>;

trait LabelHelpers<'a> {
    fn borrow_option(&'a self) -> Option<&'a str>;
    fn borrow_or_default(&'a self) -> &'a str;
}
impl<'a> LabelHelpers<'a> for Label<'a> {
    fn borrow_option(&'a self) -> Option<&'a str> {
        self.as_ref().map(|cow| cow.as_ref())
    }
    fn borrow_or_default(&'a self) -> &'a str {
        self.borrow_option().unwrap_or_default()
    }
}

/// Fast hash map used internally.
type FastHashMap<K, V> =
    std::collections::HashMap<K, V, std::hash::BuildHasherDefault<fxhash::FxHasher>>;
/// Fast hash set used internally.
type FastHashSet<K> = std::collections::HashSet<K, std::hash::BuildHasherDefault<fxhash::FxHasher>>;

#[cfg(feature = "api_log_info")]
macro_rules! api_log {
    ($($arg:tt)+) => (log::info!($($arg)+))
}
#[cfg(not(feature = "api_log_info"))]
macro_rules! api_log {
    ($($arg:tt)+) => (log::trace!($($arg)+))
}
pub(crate) use api_log;

#[cfg(feature = "resource_log_info")]
macro_rules! resource_log {
    ($($arg:tt)+) => (log::info!($($arg)+))
}
#[cfg(not(feature = "resource_log_info"))]
macro_rules! resource_log {
    ($($arg:tt)+) => (log::trace!($($arg)+))
}
pub(crate) use resource_log;
