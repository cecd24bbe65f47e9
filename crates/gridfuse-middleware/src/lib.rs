//! `gridfuse-middleware` – event transport for the costmap pipeline.
//!
//! Routes sensor messages and fused grids between producers and consumers
//! without caring about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.
//! - [`bridge`] – [`SensorBridge`]: wraps raw sensor messages and
//!   newline-delimited JSON into [`Event`][gridfuse_types::Event]s and
//!   publishes them on the right topic.

pub mod bridge;
pub mod bus;

pub use bridge::SensorBridge;
pub use bus::{EventBus, InputReceiver, Topic, TopicReceiver};
