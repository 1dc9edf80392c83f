//! Domain entities for the DockForLife bridge.
//!
//! This module contains pure business logic with no infrastructure
//! dependencies: nothing in here opens a socket, spawns a task, or reads the
//! clock in a way that could block.
//!
//! # What lives here?
//!
//! - [`command`] – the abstract command vocabulary (mute, scene, record,
//!   stream, visibility, filter), its validation rules, and the result shape.
//! - [`join_code`] – the short human-shareable code that pairs a remote
//!   controller with one running bridge.
//! - [`scene_cache`] – the last known program scene, with an explicit
//!   "pending switch" state that the event stream later reconciles.

pub mod command;
pub mod join_code;
pub mod scene_cache;
