//! Broker pull-bridge protocol engine.
//!
//! Connects an encrypted broker inbox to a locally running agent process:
//! long-polls signed envelopes, decrypts/verifies/deduplicates them,
//! forwards actionable chat events to the agent over a point-to-point RPC
//! socket, and relays agent-originated replies back through the broker.

pub mod agent;
pub mod broker;
pub mod canonical;
pub mod config;
pub mod crypto;
pub mod dedupe;
pub mod error;
pub mod events;
pub mod health;
pub mod local_api;
pub mod logbuf;
pub mod outbound;
pub mod pipeline;
pub mod policy;
pub mod poller;
pub mod threads;
pub mod wire;
