//! Command-line front end for fund-monitor, plus the Chromium-backed
//! implementation of its browser capability.

pub mod cli;
pub mod renderer;
pub mod site;
