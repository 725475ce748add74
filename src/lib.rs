//! Upload capture data to a reality data store, run a reconstruction job on
//! it, follow the job to completion and download what it produced.

pub mod config;
pub mod error;
pub mod outputs;
pub mod pipeline;
pub mod poller;
pub mod reality;
pub mod references;
pub mod rewrite;
pub mod state_machine;
pub mod upload;
mod xml;
