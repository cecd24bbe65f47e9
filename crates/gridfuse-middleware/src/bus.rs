//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::SensorPoints`] | Ground-filtered lidar point clouds |
//! | [`Topic::DetectedObjects`] | Object lists from the detector |
//! | [`Topic::Waypoints`] | Planned paths |
//! | [`Topic::Costmap`] | Fused grid snapshots emitted by the pipeline |
//!
//! Every event published on an input topic is also copied onto one merged
//! input stream ([`EventBus::subscribe_inputs`]), which preserves the order
//! in which events were published across all input topics.

use gridfuse_types::{Event, EventPayload, GridError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    SensorPoints,
    DetectedObjects,
    Waypoints,
    Costmap,
}

impl Topic {
    /// Input topics the pipeline consumes.
    pub const INPUTS: [Topic; 3] = [Topic::SensorPoints, Topic::DetectedObjects, Topic::Waypoints];

    pub fn is_input(self) -> bool {
        Topic::INPUTS.contains(&self)
    }

    /// The topic a payload belongs on.
    pub fn for_payload(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::PointCloud(_) => Topic::SensorPoints,
            EventPayload::ObjectList(_) => Topic::DetectedObjects,
            EventPayload::WaypointList(_) => Topic::Waypoints,
            EventPayload::Costmap(_) => Topic::Costmap,
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    sensor_points: broadcast::Sender<Event>,
    detected_objects: broadcast::Sender<Event>,
    waypoints: broadcast::Sender<Event>,
    costmap: broadcast::Sender<Event>,
    inputs: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel and to the merged
    /// input stream independently.
    pub fn new(capacity: usize) -> Self {
        let (sensor_points, _) = broadcast::channel(capacity);
        let (detected_objects, _) = broadcast::channel(capacity);
        let (waypoints, _) = broadcast::channel(capacity);
        let (costmap, _) = broadcast::channel(capacity);
        let (inputs, _) = broadcast::channel(capacity);
        Self {
            sensor_points,
            detected_objects,
            waypoints,
            costmap,
            inputs,
        }
    }

    /// Publish `event` to the given [`Topic`] channel, and to the merged
    /// input stream when `topic` is an input.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`GridError::Channel`] when nobody is listening.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, GridError> {
        let mut delivered = 0;
        if topic.is_input() && self.inputs.receiver_count() > 0 {
            delivered += self.inputs.send(event.clone()).unwrap_or(0);
        }
        delivered += self.topic_sender(topic).send(event).unwrap_or(0);
        if delivered == 0 {
            return Err(GridError::Channel(format!(
                "No subscribers for topic {:?}",
                topic
            )));
        }
        Ok(delivered)
    }

    /// Publish `event` on the topic matching its payload.
    pub fn publish(&self, event: Event) -> Result<usize, GridError> {
        let topic = Topic::for_payload(&event.payload);
        self.publish_to(topic, event)
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Subscribe to every input topic at once, in publication order.
    pub fn subscribe_inputs(&self) -> InputReceiver {
        InputReceiver {
            receiver: self.inputs.subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    ///
    /// Merged input-stream subscribers are not included.
    pub fn receiver_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::SensorPoints => &self.sensor_points,
            Topic::DetectedObjects => &self.detected_objects,
            Topic::Waypoints => &self.waypoints,
            Topic::Costmap => &self.costmap,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

/// Receiver for the merged input stream.
///
/// Obtained via [`EventBus::subscribe_inputs`].
pub struct InputReceiver {
    receiver: broadcast::Receiver<Event>,
}

impl InputReceiver {
    /// Wait for the next input event; errors as for [`TopicReceiver::recv`].
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Take the next already-published input event without waiting.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }
}
