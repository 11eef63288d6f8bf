//! Host-side helpers for the `virtualview` engine.
//!
//! `virtualview` is UI-agnostic and only decides what to realize and where. This crate adds the
//! small, framework-neutral pieces most hosts end up writing themselves:
//!
//! - a [`Controller`] that pumps the engine once per frame and reports scroll requests
//! - tween-driven smooth scrolling to an entity or offset
//! - focus anchors that keep the same item in view across prepends and reloads
#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

#[cfg(test)]
extern crate std;

#[macro_use]
mod macros;

mod anchor;
mod controller;
mod tween;


pub use anchor::{FocusAnchor, apply_focus_anchor, capture_focus_anchor, capture_focus_anchor_at};
pub use controller::{Controller, Frame};
pub use tween::Tween;
pub use virtualview::Easing;
