//! Sensor ingest bridge.
//!
//! [`SensorBridge`] turns raw perception messages into [`Event`] values and
//! publishes them onto the internal [`EventBus`].  It also accepts
//! newline-delimited JSON, one serialized [`Event`] per line, so recorded
//! traffic can be replayed into a live bus.
//!
//! The bridge does not interpret the data it routes; it only handles
//! envelope construction and serialisation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use gridfuse_types::{
    DetectedObject, Event, EventPayload, GridError, ObjectList, Point3, PointCloud, Waypoint,
    WaypointList,
};
use tracing::{trace, warn};

use crate::bus::EventBus;

/// Bridge between external sensor feeds and the internal [`EventBus`].
#[derive(Clone)]
pub struct SensorBridge {
    bus: Arc<EventBus>,
}

impl SensorBridge {
    /// Create a new bridge backed by `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    // -----------------------------------------------------------------------
    // Ingest helpers
    // -----------------------------------------------------------------------

    /// Publish a ground-filtered point cloud as an
    /// [`EventPayload::PointCloud`] event.
    pub fn ingest_points(
        &self,
        frame_id: impl Into<String>,
        stamp: DateTime<Utc>,
        points: Vec<Point3>,
    ) -> Result<usize, GridError> {
        let event = Event::new(
            "gridfuse-middleware::points_no_ground",
            EventPayload::PointCloud(PointCloud {
                frame_id: frame_id.into(),
                stamp,
                points,
            }),
        );
        self.bus.publish(event)
    }

    /// Publish a detector output as an [`EventPayload::ObjectList`] event.
    pub fn ingest_objects(
        &self,
        frame_id: impl Into<String>,
        stamp: DateTime<Utc>,
        objects: Vec<DetectedObject>,
    ) -> Result<usize, GridError> {
        let event = Event::new(
            "gridfuse-middleware::objects",
            EventPayload::ObjectList(ObjectList {
                frame_id: frame_id.into(),
                stamp,
                objects,
            }),
        );
        self.bus.publish(event)
    }

    /// Publish a planned path as an [`EventPayload::WaypointList`] event.
    pub fn ingest_waypoints(
        &self,
        stamp: DateTime<Utc>,
        waypoints: Vec<Waypoint>,
    ) -> Result<usize, GridError> {
        let event = Event::new(
            "gridfuse-middleware::waypoints",
            EventPayload::WaypointList(WaypointList { stamp, waypoints }),
        );
        self.bus.publish(event)
    }

    // -----------------------------------------------------------------------
    // JSON replay
    // -----------------------------------------------------------------------

    /// Parse one line of newline-delimited JSON into an [`Event`].
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Serialization`] if the line is not a valid event.
    pub fn parse_line(line: &str) -> Result<Event, GridError> {
        serde_json::from_str(line).map_err(|e| GridError::Serialization(e.to_string()))
    }

    /// Parse `line` and publish the event on the topic matching its payload.
    ///
    /// Blank lines are skipped and yield `Ok(0)`.
    pub fn ingest_json(&self, line: &str) -> Result<usize, GridError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(0);
        }
        let event = Self::parse_line(line)?;
        trace!(id = %event.id, source = %event.source, "replaying event");
        self.bus.publish(event)
    }

    /// Replay every line of `input`, returning how many events were
    /// published.  Malformed lines are logged and skipped.
    pub fn replay(&self, input: &str) -> usize {
        let mut published = 0;
        for (number, line) in input.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match self.ingest_json(line) {
                Ok(_) => published += 1,
                Err(e) => warn!(line = number + 1, error = %e, "skipping replay line"),
            }
        }
        published
    }
}
