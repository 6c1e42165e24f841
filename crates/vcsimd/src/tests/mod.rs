//! Test suites for the simulator daemon.

mod behaviour;
mod support;
