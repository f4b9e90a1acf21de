//! Grandma Daemon (grandmad)
//!
//! Durable delayed notification scheduling, run as a single node or as a
//! master distributing work to slaves.
//!
//! ## Deployment Modes
//!
//! - **Standalone**: every request is scheduled locally
//! - **Master**: requests go to the least-loaded slave, or stay local when
//!   every slave is busier than the master
//! - **Slave**: schedules what its master forwards
//!
//! ## Quick Start
//!
//! ```bash
//! # Standalone, records in memory
//! grandmad
//!
//! # Slave
//! grandmad --mode slave --network-addr 0.0.0.0:12345 --data-dir /var/lib/grandma
//!
//! # Master
//! grandmad --mode master --slaves 10.0.0.2:12345,10.0.0.3:12345 --data-dir /var/lib/grandma
//! ```

pub mod cli;
pub mod config;
pub mod delivery;
pub mod error;
pub mod server;

pub use cli::{Cli, DeploymentMode};
pub use config::DaemonConfig;
pub use delivery::LogDeliverer;
pub use error::{DaemonError, Result};
pub use server::{Server, ShutdownHandle};
