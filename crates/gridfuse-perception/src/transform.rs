//! Transform Frame (TF) Engine – the coordinate resolver.
//!
//! Maintains a graph of named reference frames and the 3-D rigid-body
//! transforms (translation + quaternion rotation) that relate them.  Edges are
//! either *static* (valid at every time) or carry a short, time-stamped
//! history so that a lookup can be resolved at the stamp of the data being
//! converted.  Lookups walk edges in both directions, inverting as needed.
//!
//! [`TfEngine`] is a plain single-owner structure.  [`TfBuffer`] wraps it for
//! use across threads and implements the bounded-wait lookup: a caller blocks
//! until the required transform arrives or the timeout elapses, and gets an
//! explicit [`GridError::TransformUnavailable`] instead of a panic.
//!
//! # Example
//!
//! ```rust
//! use gridfuse_perception::transform::{TfEngine, Transform3D, Vec3, Quaternion};
//!
//! let mut tf = TfEngine::new();
//!
//! // robot_base is 1 m forward of map origin, same orientation.
//! tf.set_static_transform("map", "robot_base",
//!     Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()));
//!
//! // velodyne is 0.5 m forward of robot_base, same orientation.
//! tf.set_static_transform("robot_base", "velodyne",
//!     Transform3D::new(Vec3::new(0.5, 0.0, 0.0), Quaternion::identity()));
//!
//! // Maps points expressed in velodyne into map.
//! let t = tf.lookup("map", "velodyne").unwrap();
//! assert!((t.translation.x - 1.5).abs() < 1e-5);
//!
//! // And the other way round.
//! let back = tf.lookup("velodyne", "map").unwrap();
//! assert!((back.translation.x + 1.5).abs() < 1e-5);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Add, Neg};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use gridfuse_types::{GridError, Point3};
use tracing::debug;

/// Samples retained per dynamic edge.
const HISTORY_LEN: usize = 64;

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    /// Create a new vector.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl From<Point3> for Vec3 {
    fn from(p: Point3) -> Self {
        Self::new(p.x, p.y, p.z)
    }
}

impl From<Vec3> for Point3 {
    fn from(v: Vec3) -> Self {
        Point3::new(v.x, v.y, v.z)
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `yaw` radians about +Z.
    pub fn from_yaw(yaw: f32) -> Self {
        let half = yaw * 0.5;
        Self::new(half.cos(), 0.0, 0.0, half.sin())
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    /// Create a transform from a translation and rotation.
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Planar pose `(x, y, yaw)` as a transform.
    pub fn from_planar(x: f32, y: f32, yaw: f32) -> Self {
        Self::new(Vec3::new(x, y, 0.0), Quaternion::from_yaw(yaw))
    }

    /// Compose two transforms: `self` applied first, then `other`.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation + self.rotation.rotate(other.translation);
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// If `self` = T_A_B, returns T_B_A.
    pub fn inverse(self) -> Self {
        let rotation = self.rotation.conjugate();
        Self::new(rotation.rotate(-self.translation), rotation)
    }

    /// Map a point from the child frame into the parent frame.
    pub fn apply(self, p: Point3) -> Point3 {
        (self.translation + self.rotation.rotate(p.into())).into()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Edge storage
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum EdgeData {
    Static(Transform3D),
    /// Oldest first.
    Dynamic(VecDeque<(DateTime<Utc>, Transform3D)>),
}

impl EdgeData {
    /// Transform valid at `stamp` (latest when `None`): the newest sample not
    /// younger than `stamp`.
    fn sample_at(&self, stamp: Option<DateTime<Utc>>) -> Result<Transform3D, String> {
        match self {
            EdgeData::Static(t) => Ok(*t),
            EdgeData::Dynamic(history) => {
                let Some((newest_stamp, newest)) = history.back() else {
                    return Err("no samples received".to_string());
                };
                let Some(stamp) = stamp else {
                    return Ok(*newest);
                };
                if stamp > *newest_stamp {
                    return Err(format!(
                        "requested {stamp} is newer than latest sample {newest_stamp}"
                    ));
                }
                history
                    .iter()
                    .rev()
                    .find(|(s, _)| *s <= stamp)
                    .map(|(_, t)| *t)
                    .ok_or_else(|| format!("requested {stamp} is older than the retained history"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    /// parent → child, use the stored transform.
    Forward,
    /// child → parent, use its inverse.
    Reverse,
}

// ────────────────────────────────────────────────────────────────────────────
// TfEngine
// ────────────────────────────────────────────────────────────────────────────

/// A graph of named reference frames and the [`Transform3D`]s that relate
/// them.
///
/// Frames are identified by arbitrary string names (e.g. `"map"`,
/// `"base_link"`, `"velodyne"`).  Each edge is stored once, parent to child,
/// and is walked in either direction.
#[derive(Debug, Default)]
pub struct TfEngine {
    /// `edges[parent][child]`
    edges: HashMap<String, HashMap<String, EdgeData>>,
    /// `parents[child]` – reverse adjacency for upward walks.
    parents: HashMap<String, HashSet<String>>,
}

impl TfEngine {
    /// Create an empty TF engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a transform valid at every time.
    pub fn set_static_transform(
        &mut self,
        parent_frame: &str,
        child_frame: &str,
        transform: Transform3D,
    ) {
        self.link(parent_frame, child_frame);
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), EdgeData::Static(transform));
    }

    /// Append a time-stamped sample of the transform from `parent_frame` to
    /// `child_frame`.  Samples older than the newest one already stored are
    /// inserted in order; the history keeps the latest [`HISTORY_LEN`].
    pub fn set_transform(
        &mut self,
        parent_frame: &str,
        child_frame: &str,
        transform: Transform3D,
        stamp: DateTime<Utc>,
    ) {
        self.link(parent_frame, child_frame);
        let entry = self
            .edges
            .entry(parent_frame.to_string())
            .or_default()
            .entry(child_frame.to_string())
            .or_insert_with(|| EdgeData::Dynamic(VecDeque::new()));

        // A dynamic sample replaces a static edge.
        if matches!(entry, EdgeData::Static(_)) {
            *entry = EdgeData::Dynamic(VecDeque::new());
        }
        if let EdgeData::Dynamic(history) = entry {
            let pos = history.partition_point(|(s, _)| *s <= stamp);
            history.insert(pos, (stamp, transform));
            while history.len() > HISTORY_LEN {
                history.pop_front();
            }
        }
    }

    /// True when both frames are known and connected, regardless of whether
    /// samples exist at any particular time.
    pub fn can_connect(&self, target_frame: &str, source_frame: &str) -> bool {
        target_frame == source_frame || self.path(target_frame, source_frame).is_some()
    }

    /// Latest transform mapping points in `source_frame` into `target_frame`.
    ///
    /// Returns `None` if no path exists or an edge on the path has no sample.
    pub fn lookup(&self, target_frame: &str, source_frame: &str) -> Option<Transform3D> {
        self.lookup_at(target_frame, source_frame, None).ok()
    }

    /// Transform mapping points in `source_frame` into `target_frame`, valid
    /// at `stamp` (`None` = latest).
    ///
    /// On failure returns a human-readable reason.
    pub fn lookup_at(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Option<DateTime<Utc>>,
    ) -> Result<Transform3D, String> {
        if target_frame == source_frame {
            return Ok(Transform3D::identity());
        }

        let path = self.path(target_frame, source_frame).ok_or_else(|| {
            format!("frames '{target_frame}' and '{source_frame}' are not connected")
        })?;

        let mut accumulated = Transform3D::identity();
        for (from, to, direction) in path {
            let step = match direction {
                Direction::Forward => self.edge(&from, &to)?.sample_at(stamp)?,
                Direction::Reverse => self.edge(&to, &from)?.sample_at(stamp)?.inverse(),
            };
            accumulated = accumulated.compose(step);
        }
        Ok(accumulated)
    }

    fn link(&mut self, parent_frame: &str, child_frame: &str) {
        self.parents
            .entry(child_frame.to_string())
            .or_default()
            .insert(parent_frame.to_string());
    }

    fn edge(&self, parent: &str, child: &str) -> Result<&EdgeData, String> {
        self.edges
            .get(parent)
            .and_then(|children| children.get(child))
            .ok_or_else(|| format!("edge '{parent}' -> '{child}' vanished"))
    }

    /// BFS from `target` to `source`; returns the hops in walk order.
    fn path(&self, target: &str, source: &str) -> Option<Vec<(String, String, Direction)>> {
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut came_from: HashMap<String, (String, Direction)> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::new();

        queue.push_back(target.to_string());
        visited.insert(target.to_string());

        while let Some(current) = queue.pop_front() {
            if current == source {
                let mut hops = Vec::new();
                let mut node = current;
                while let Some((prev, direction)) = came_from.get(&node) {
                    hops.push((prev.clone(), node.clone(), *direction));
                    node = prev.clone();
                }
                hops.reverse();
                return Some(hops);
            }

            let children = self
                .edges
                .get(&current)
                .into_iter()
                .flat_map(|c| c.keys())
                .map(|n| (n, Direction::Forward));
            let parents = self
                .parents
                .get(&current)
                .into_iter()
                .flatten()
                .map(|n| (n, Direction::Reverse));

            for (next, direction) in children.chain(parents) {
                if visited.insert(next.clone()) {
                    came_from.insert(next.clone(), (current.clone(), direction));
                    queue.push_back(next.clone());
                }
            }
        }

        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Lookup interface
// ────────────────────────────────────────────────────────────────────────────

/// Source of frame transforms consumed by the polygon rasterizer.
pub trait TransformLookup {
    /// Transform mapping points in `source_frame` into `target_frame` at
    /// `stamp` (`None` = latest), waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::TransformUnavailable`] when the transform cannot
    /// be resolved before the deadline.
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Option<DateTime<Utc>>,
        timeout: Duration,
    ) -> Result<Transform3D, GridError>;
}

fn unavailable(target_frame: &str, source_frame: &str, reason: String) -> GridError {
    GridError::TransformUnavailable {
        target_frame: target_frame.to_string(),
        source_frame: source_frame.to_string(),
        reason,
    }
}

/// A bare engine cannot change while it is borrowed, so it answers
/// immediately and ignores `timeout`.
impl TransformLookup for TfEngine {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Option<DateTime<Utc>>,
        _timeout: Duration,
    ) -> Result<Transform3D, GridError> {
        self.lookup_at(target_frame, source_frame, stamp)
            .map_err(|reason| unavailable(target_frame, source_frame, reason))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfBuffer
// ────────────────────────────────────────────────────────────────────────────

/// Thread-safe [`TfEngine`] whose lookups wait for late transforms.
///
/// Writers (a transport callback, a localisation thread) call
/// [`TfBuffer::set_transform`]; every write wakes blocked lookups so they can
/// retry before their deadline.  Share it with `Arc<TfBuffer>`.
#[derive(Debug, Default)]
pub struct TfBuffer {
    engine: Mutex<TfEngine>,
    updated: Condvar,
}

impl TfBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_static_transform(&self, parent_frame: &str, child_frame: &str, transform: Transform3D) {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_static_transform(parent_frame, child_frame, transform);
        self.updated.notify_all();
    }

    pub fn set_transform(
        &self,
        parent_frame: &str,
        child_frame: &str,
        transform: Transform3D,
        stamp: DateTime<Utc>,
    ) {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_transform(parent_frame, child_frame, transform, stamp);
        self.updated.notify_all();
    }
}

impl TransformLookup for TfBuffer {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Option<DateTime<Utc>>,
        timeout: Duration,
    ) -> Result<Transform3D, GridError> {
        let deadline = Instant::now() + timeout;
        let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            let reason = match engine.lookup_at(target_frame, source_frame, stamp) {
                Ok(t) => return Ok(t),
                Err(reason) => reason,
            };

            let now = Instant::now();
            if now >= deadline {
                debug!(target_frame, source_frame, %reason, "transform lookup timed out");
                return Err(unavailable(
                    target_frame,
                    source_frame,
                    format!("{reason} (waited {} ms)", timeout.as_millis()),
                ));
            }

            engine = self
                .updated
                .wait_timeout(engine, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
