//! Assessment events - event-driven integration layer
//!
//! Shared messaging contracts for the university assessment/feedback
//! microservices: the AMQP exchange/queue topology, the JSON event
//! envelope, a confirmed publisher with bounded retries, an at-least-once
//! consumer with dead-lettering, and the survey lifecycle and submission
//! guard that sit on top of them.

pub mod auth;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod guard;
pub mod publisher;
pub mod storage;
pub mod survey;
pub mod topology;
pub mod utils;
