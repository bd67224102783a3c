//! paywatch library
//!
//! Browser-driven recharge automation and payment-completion monitoring
//! for a telecom self-care portal. The core is a pure redirect classifier,
//! a polling monitor over a browser-driver capability, and an append-only
//! event log; around them sit the parameterized portal flow, a CAPTCHA
//! oracle, typed configuration, a CLI, and an HTTP API.

pub mod captcha;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod driver;
pub mod events;
pub mod flow;
pub mod logging;
pub mod monitor;
pub mod server;
