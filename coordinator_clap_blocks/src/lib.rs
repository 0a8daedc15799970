//! Building blocks for [`clap`]-driven configuration of a coordinator.
//!
//! Each block is a `#[clap(flatten)]`-able struct; every flag can also be
//! set through its environment variable.

pub mod forwarding;
pub mod tags;
