//! The api module talks to the controller over HTTP.
//! This file declares the other files in this directory as sub-modules.

pub mod client;
pub mod models;

pub use client::{ApiError, ControllerApi, HttpControllerApi};
pub use models::{DeviceState, ModeRequest, PidSaveRequest, ProfileSaveRequest, ProfileStep};
