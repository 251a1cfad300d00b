//! Point-to-point distance measurement over snapped pick points.

use glam::Vec3;

/// A completed measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub id: u32,
    pub start: Vec3,
    pub end: Vec3,
    pub distance: f32,
}

/// Click to start, move to preview, click to finish.
#[derive(Debug, Default)]
pub struct MeasureTool {
    active: bool,
    start: Option<Vec3>,
    preview: Option<Vec3>,
    next_id: u32,
    measurements: Vec<Measurement>,
}

impl MeasureTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns the tool on or off. Turning it off drops the pending start point.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        if !active {
            self.start = None;
            self.preview = None;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feeds a clicked point. Returns the measurement completed by this click.
    pub fn handle_point(&mut self, point: Vec3) -> Option<Measurement> {
        if !self.active {
            return None;
        }

        let Some(start) = self.start.take() else {
            self.start = Some(point);
            return None;
        };

        let measurement = Measurement {
            id: self.next_id,
            start,
            end: point,
            distance: start.distance(point),
        };
        self.next_id += 1;
        self.preview = None;
        self.measurements.push(measurement.clone());

        tracing::debug!("Measurement {}: {:.4}", measurement.id, measurement.distance);
        Some(measurement)
    }

    /// Updates the hover point. Returns the live distance while a start point is pending.
    pub fn preview(&mut self, point: Vec3) -> Option<f32> {
        if !self.active {
            return None;
        }
        self.preview = Some(point);
        self.start.map(|start| start.distance(point))
    }

    pub fn pending_start(&self) -> Option<Vec3> {
        self.start
    }

    pub fn preview_point(&self) -> Option<Vec3> {
        self.preview
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Removes a measurement by id. Returns false if it does not exist.
    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.measurements.len();
        self.measurements.retain(|m| m.id != id);
        self.measurements.len() != before
    }

    /// Drops all measurements and any pending start point.
    pub fn clear(&mut self) {
        self.measurements.clear();
        self.start = None;
        self.preview = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_two_clicks_make_a_measurement() {
        let mut tool = MeasureTool::new();
        tool.set_active(true);

        assert!(tool.handle_point(Vec3::ZERO).is_none());
        assert_relative_eq!(tool.preview(Vec3::new(0.0, 2.0, 0.0)).unwrap(), 2.0);

        let m = tool.handle_point(Vec3::new(3.0, 4.0, 0.0)).unwrap();
        assert_eq!(m.id, 0);
        assert_relative_eq!(m.distance, 5.0);
        assert!(tool.pending_start().is_none());
        assert_eq!(tool.measurements().len(), 1);
    }

    #[test]
    fn test_inactive_tool_ignores_points() {
        let mut tool = MeasureTool::new();
        assert!(tool.handle_point(Vec3::ONE).is_none());
        assert!(tool.preview(Vec3::ONE).is_none());
        assert!(tool.pending_start().is_none());
    }

    #[test]
    fn test_deactivate_drops_pending_start() {
        let mut tool = MeasureTool::new();
        tool.set_active(true);
        tool.handle_point(Vec3::ONE);
        tool.set_active(false);
        tool.set_active(true);
        assert!(tool.handle_point(Vec3::ZERO).is_none());
    }

    #[test]
    fn test_remove_and_clear() {
        let mut tool = MeasureTool::new();
        tool.set_active(true);
        for x in 0..3 {
            tool.handle_point(Vec3::ZERO);
            tool.handle_point(Vec3::new(x as f32 + 1.0, 0.0, 0.0));
        }
        assert!(tool.remove(1));
        assert!(!tool.remove(1));
        let ids: Vec<_> = tool.measurements().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![0, 2]);

        tool.clear();
        assert!(tool.measurements().is_empty());
    }
}
