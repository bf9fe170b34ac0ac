//! Call Insights: multi-tenant voice-call event processing.
//!
//! Webhook events are routed per tenant, live calls are tracked, completed
//! calls are stored and enriched in the background, and scheduling triggers
//! fire for calls that booked an appointment.

pub mod api;
pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;
