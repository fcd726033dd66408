//! Launch-configuration resolver and process lifecycle controller for a
//! mixture-of-experts worker node.
//!
//! Raw options from the command line and an optional YAML file are resolved
//! into an immutable [`config::LaunchPlan`]; a [`lifecycle::LifecycleController`]
//! then applies environment adjustments, starts the node and shuts it down
//! exactly once.

pub mod cli;
pub mod config;
pub mod lifecycle;
pub mod node;
pub mod plugin;
