//! Client-side core of the marketplace: live product synchronization, the
//! admin moderation queue, dashboard metrics and live system monitoring, all
//! backed by a hosted backend reached through [`gateway::RemoteGateway`].

pub mod config;
pub mod gateway;
mod lenient;
pub mod live;
pub mod mapper;
pub mod metrics;
pub mod model;
pub mod moderation;
pub mod monitoring;
