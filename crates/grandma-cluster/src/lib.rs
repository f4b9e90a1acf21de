//! # Grandma Cluster
//!
//! Master/slave distribution of schedule requests:
//! - **Transport**: 2-byte length-prefixed frames over TCP
//! - **Handshake**: three-level exchange with optional shared-secret auth
//! - **Registry**: slaves ranked by load in an explicit min-heap
//! - **Router**: keeps a request locally or queues it for the least-loaded slave
//! - **Send loops**: pipelined forwarding with per-request acknowledgement
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────── Master ────────────────────────────┐
//! │ submit ─► Router ─► Registry.pick ─► Node send queue          │
//! │              │                          │                     │
//! │              ▼                          ▼ send loop           │
//! │         Scheduler (local)        frame 151 ─────────────┐     │
//! │                                  ack 150/140 ◄── read ──┤     │
//! └─────────────────────────────────────────────────────────┼─────┘
//!                                                           │ TCP
//! ┌─────────────────────────── Slave ───────────────────────┼─────┐
//! │ read loop ─► Scheduler.create ─► reply 150 / 140 ◄──────┘     │
//! │                      └─ fired ─► reply 152                    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use grandma_cluster::{Cluster, ClusterConfig};
//!
//! let config = ClusterConfig::master(vec!["10.0.0.2:7070", "10.0.0.3:7070"]);
//! let cluster = Cluster::start(config, scheduler, shutdown_tx).await?;
//! let placement = cluster.router().submit(106, "ops@example.com", "hello", 60_000).await?;
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod master;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod sender;
pub mod slave;

pub use cluster::{Cluster, Role};
pub use config::{ClusterConfig, ClusterMode, LoadConfig, DEFAULT_NODE_NAME};
pub use error::{ClusterError, Result};
pub use framing::{FrameReader, FrameWriter, ReadFrame, MAX_FRAME_PAYLOAD};
pub use handshake::{HandshakeConfig, HandshakeFailure, PeerIdentity};
pub use master::Master;
pub use node::{AckReply, Generation, Node, SlotId};
pub use protocol::ClusterMessage;
pub use registry::{Candidate, Registry, CLOSED_LOAD};
pub use router::{Placement, Router};
pub use slave::Slave;
