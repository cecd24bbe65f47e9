//! Writes emitted costmaps as newline-delimited JSON events.

use std::io::Write;

use gridfuse_runtime::GridPublisher;
use gridfuse_types::{Event, EventPayload, GridError, GridSnapshot};

pub struct NdjsonPublisher<W> {
    out: W,
}

impl<W: Write + Send> NdjsonPublisher<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> GridPublisher for NdjsonPublisher<W> {
    fn publish(&mut self, snapshot: &GridSnapshot) -> Result<(), GridError> {
        let event = Event::new("gridfuse-cli", EventPayload::Costmap(snapshot.clone()));
        let line =
            serde_json::to_string(&event).map_err(|e| GridError::Serialization(e.to_string()))?;
        writeln!(self.out, "{line}")
            .and_then(|()| self.out.flush())
            .map_err(|e| GridError::Channel(format!("failed to write costmap: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gridfuse_perception::Grid;
    use gridfuse_types::LayerKind;

    #[test]
    fn writes_one_event_per_line() {
        let grid = Grid::new("velodyne", 2.0, 2.0, 1.0, 0.0, 0.0).unwrap();
        let mut publisher = NdjsonPublisher::new(Vec::new());
        publisher.publish(&grid.snapshot(Utc::now())).unwrap();
        publisher.publish(&grid.snapshot(Utc::now())).unwrap();

        let text = String::from_utf8(publisher.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let event: Event = serde_json::from_str(lines[0]).unwrap();
        let EventPayload::Costmap(snapshot) = event.payload else {
            panic!("expected costmap payload");
        };
        assert_eq!(snapshot.layer(LayerKind::Combined).map(<[f32]>::len), Some(4));
    }
}
