//! Core persona model for Troupe.
//!
//! Defines the universal types that all Troupe subsystems depend on:
//! - [`Character`]: the agent persona document (name, bio, style, settings)
//! - [`Bio`]: single-string or list-of-strings biography
//! - [`Style`]: per-channel style guidance lists
//! - [`World`]: the long-lived per-agent context record
//!
//! These types are consumed by the modification service, the environment
//! variable manager and the plugin host. The character document is the
//! contract between an agent's persona and everything that mutates it.

mod character;
mod world;

pub use character::{Bio, Character, Style};
pub use world::World;
