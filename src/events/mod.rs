//! # Events Module
//!
//! Structured event stream for run reporting.
//!
//! ## Design
//! The engine holds no spinner or logger state of its own. It emits events
//! through channels, and whatever front end is attached (CLI, CI bot, GUI)
//! subscribes and renders them.
//!
//! ## Example
//! ```rust,ignore
//! let handle = engine.spawn();
//!
//! for event in handle.events().iter() {
//!     match event {
//!         Event::Compare(c) => println!("{} {}", c.kind, c.path),
//!         Event::Complete(done) => println!("{} failed", done.result.failed_items.len()),
//!         _ => {}
//!     }
//! }
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
