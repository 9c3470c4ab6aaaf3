//! Local TCP port forwarding through an SSH end host, optionally reached
//! through a single jump host.
//!
//! A tunnel listens on a local address and, for every accepted connection,
//! opens a `direct-tcpip` channel on the end host towards the remote address,
//! then copies bytes both ways until either side is done.

pub use crate::{
    address::Destination,
    config::{ApplicationConfig, HostCredential, TunnelSpec},
    error::{Direction, TunnelError},
    tunnel::{ErrorSink, TunnelHandle, start},
    validation::validate,
};

mod address;
mod auth;
mod config;
mod deadline;
mod error;
mod relay;
mod session;
mod tunnel;
mod validation;
