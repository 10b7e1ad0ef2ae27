//! # RC Link Library
//!
//! Half-duplex radio link between a handheld controller and a mobile robot.
//!
//! The controller shapes raw stick/trigger/button readings into a compact
//! control vector and streams it with redundant copies; the robot turns
//! accepted updates into motor and steering commands, falls back to a
//! neutral command when the link goes quiet, and answers with battery and
//! frame-rate telemetry.

pub mod actuation;
pub mod config;
pub mod controller;
pub mod error;
pub mod link;
pub mod packet;
pub mod runtime;
pub mod state;
pub mod telemetry;
