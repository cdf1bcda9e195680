//! Register window planning
//!
//! Requested points are covered with as few contiguous reads as possible. The
//! planner walks the driver's declaration order, so a point declared at a lower
//! address after a higher one always starts a new window.

use crate::schema::{PointDefinition, PointTable, MAX_READ_REGISTERS};
use std::collections::HashSet;
use tracing::{trace, warn};

/// Default largest register count per read
pub const DEFAULT_MAX_WINDOW: u16 = 120;

/// Contiguous register range read in one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressWindow {
    /// Declared (not wire) start address
    pub start: u16,
    pub length: u16,
    /// Points covered, in declaration order
    pub points: Vec<String>,
}

impl AddressWindow {
    fn open(point: &PointDefinition) -> Self {
        Self {
            start: point.address,
            length: point.count,
            points: vec![point.name.clone()],
        }
    }

    pub fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.length)
    }
}

/// Requested names plus the named scale factors they depend on
///
/// Requested order is kept; dependencies are appended once. Names not declared
/// in `table` are kept so the caller can report them.
pub fn with_dependencies<S: AsRef<str>>(table: &PointTable, requested: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut working = Vec::with_capacity(requested.len());
    for name in requested {
        let name = name.as_ref();
        if seen.insert(name.to_string()) {
            working.push(name.to_string());
        }
    }

    let dependencies: Vec<String> = working
        .iter()
        .filter_map(|name| table.get(name))
        .filter_map(|point| point.scale_factor_point())
        .map(str::to_string)
        .collect();
    for dependency in dependencies {
        if seen.insert(dependency.clone()) {
            trace!("SF dependency: {}", dependency);
            working.push(dependency);
        }
    }
    working
}

/// Splits a working set into address windows
#[derive(Debug, Clone, Copy)]
pub struct WindowPlanner {
    max_window: u16,
}

impl Default for WindowPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WINDOW)
    }
}

impl WindowPlanner {
    /// `max_window` is clamped to 1..=125
    pub fn new(max_window: u16) -> Self {
        Self {
            max_window: max_window.clamp(1, MAX_READ_REGISTERS),
        }
    }

    pub fn max_window(&self) -> u16 {
        self.max_window
    }

    /// Whether `point` can be read within one window
    pub fn fits(&self, point: &PointDefinition) -> bool {
        point.count <= self.max_window
    }

    /// Windows covering every declared point named in `working_set`
    ///
    /// Points that do not [`fit`](Self::fits) are left out; no window is ever
    /// longer than `max_window`.
    pub fn plan<S: AsRef<str>>(&self, table: &PointTable, working_set: &[S]) -> Vec<AddressWindow> {
        let wanted: HashSet<&str> = working_set.iter().map(AsRef::as_ref).collect();
        let max = u32::from(self.max_window);

        let mut windows = Vec::new();
        let mut current: Option<AddressWindow> = None;

        for point in table.iter().filter(|p| wanted.contains(p.name.as_str())) {
            if !self.fits(point) {
                warn!(
                    "{} spans {} registers, above window {}, skipped",
                    point.name, point.count, self.max_window
                );
                continue;
            }

            match current.as_mut() {
                Some(window) if point.address >= window.start => {
                    let delta = u32::from(point.address - window.start) + u32::from(point.count);
                    if delta <= max {
                        window.length = window.length.max(delta as u16);
                        window.points.push(point.name.clone());
                        continue;
                    }
                },
                _ => {},
            }

            if let Some(done) = current.replace(AddressWindow::open(point)) {
                windows.push(done);
            }
        }

        windows.extend(current);
        trace!("Planned {} windows", windows.len());
        windows
    }
}

/// Map returned window words back to its points
///
/// A point whose slice runs past the returned words ends the walk: it and
/// every later point of the window are returned as missing.
pub fn slice_window(
    table: &PointTable,
    window: &AddressWindow,
    words: &[u16],
) -> (Vec<(String, Vec<u16>)>, Vec<String>) {
    let mut sliced = Vec::with_capacity(window.points.len());
    let mut missing = Vec::new();

    for (i, name) in window.points.iter().enumerate() {
        let Some(point) = table.get(name) else {
            missing.push(name.clone());
            continue;
        };
        let offset = usize::from(point.address.saturating_sub(window.start));
        let end = offset + usize::from(point.count);
        if end > words.len() {
            warn!(
                "Short response at {}: need {} got {}",
                window.start,
                end,
                words.len()
            );
            missing.extend(window.points[i..].iter().cloned());
            break;
        }
        sliced.push((name.clone(), words[offset..end].to_vec()));
    }
    (sliced, missing)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::schema::{DriverSchema, RegisterKind};
    use tracing_test::traced_test;

    fn table(points: &[(&str, u16, u16)]) -> DriverSchema {
        let entries: Vec<String> = points
            .iter()
            .map(|(name, addr, count)| {
                let datatype = match *count {
                    1 => "uint16",
                    2 => "uint32",
                    4 => "uint64",
                    _ => "string",
                };
                format!(
                    r#""{name}": {{"registerAddr": {addr}, "count": {count}, "datatype": "{datatype}"}}"#
                )
            })
            .collect();
        let json = format!(
            r#"{{"points": {{"input_registers": {{{}}}}},
                "unimplemented": {{"uint16": 65535, "uint32": 4294967295,
                                   "uint64": 0, "string": 0}}}}"#,
            entries.join(",")
        );
        DriverSchema::from_json_str(&json).unwrap()
    }

    fn spans(windows: &[AddressWindow]) -> Vec<(u16, u16)> {
        windows.iter().map(|w| (w.start, w.length)).collect()
    }

    // ========== plan() tests ==========

    #[test]
    fn test_window_closes_past_max() {
        let schema = table(&[("a", 0, 1), ("b", 50, 1), ("c", 119, 1), ("d", 121, 1)]);
        let planner = WindowPlanner::new(120);
        let windows = planner.plan(schema.points(RegisterKind::Input), &["a", "b", "c", "d"]);
        assert_eq!(spans(&windows), vec![(0, 120), (121, 1)]);
        assert_eq!(windows[0].points, vec!["a", "b", "c"]);
        assert_eq!(windows[1].points, vec!["d"]);
    }

    #[test]
    fn test_only_working_set_is_covered() {
        let schema = table(&[("a", 0, 1), ("b", 10, 2), ("c", 20, 1)]);
        let windows = WindowPlanner::default().plan(schema.points(RegisterKind::Input), &["b"]);
        assert_eq!(spans(&windows), vec![(10, 2)]);
    }

    #[test]
    fn test_walks_declaration_order_not_request_order() {
        let schema = table(&[("a", 0, 1), ("b", 5, 2), ("c", 9, 1)]);
        let windows =
            WindowPlanner::default().plan(schema.points(RegisterKind::Input), &["c", "a", "b"]);
        assert_eq!(spans(&windows), vec![(0, 10)]);
        assert_eq!(windows[0].points, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_lower_address_after_higher_opens_window() {
        let schema = table(&[("hi", 100, 1), ("lo", 10, 1)]);
        let windows =
            WindowPlanner::default().plan(schema.points(RegisterKind::Input), &["hi", "lo"]);
        assert_eq!(spans(&windows), vec![(100, 1), (10, 1)]);
    }

    #[test]
    fn test_overlapping_point_does_not_shrink_window() {
        let schema = table(&[("wide", 0, 4), ("inner", 1, 1)]);
        let windows =
            WindowPlanner::default().plan(schema.points(RegisterKind::Input), &["wide", "inner"]);
        assert_eq!(spans(&windows), vec![(0, 4)]);
    }

    #[test]
    fn test_small_max_window() {
        let schema = table(&[("a", 0, 2), ("b", 2, 2), ("c", 4, 2)]);
        let windows = WindowPlanner::new(4).plan(schema.points(RegisterKind::Input), &["a", "b", "c"]);
        assert_eq!(spans(&windows), vec![(0, 4), (4, 2)]);
    }

    #[test]
    #[traced_test]
    fn test_point_larger_than_window_is_skipped() {
        let schema = table(&[("a", 0, 1), ("text", 1, 16), ("b", 17, 1)]);
        let planner = WindowPlanner::new(10);
        let points = schema.points(RegisterKind::Input);
        let windows = planner.plan(points, &["a", "text", "b"]);

        assert_eq!(spans(&windows), vec![(0, 1), (17, 1)]);
        assert!(windows.iter().all(|w| w.length <= planner.max_window()));
        assert!(!planner.fits(points.get("text").unwrap()));
        assert!(planner.fits(points.get("a").unwrap()));
        assert!(logs_contain("text spans 16 registers"));
    }

    #[test]
    fn test_max_window_clamped() {
        assert_eq!(WindowPlanner::new(0).max_window(), 1);
        assert_eq!(WindowPlanner::new(500).max_window(), 125);
    }

    #[test]
    fn test_empty_working_set() {
        let schema = table(&[("a", 0, 1)]);
        let windows =
            WindowPlanner::default().plan(schema.points(RegisterKind::Input), &[] as &[&str]);
        assert!(windows.is_empty());
    }

    // ========== slice_window() tests ==========

    #[test]
    fn test_slice_maps_offsets() {
        let schema = table(&[("a", 10, 1), ("b", 12, 2)]);
        let points = schema.points(RegisterKind::Input);
        let window = &WindowPlanner::default().plan(points, &["a", "b"])[0];
        let (sliced, missing) = slice_window(points, window, &[1, 2, 3, 4]);
        assert!(missing.is_empty());
        assert_eq!(
            sliced,
            vec![("a".to_string(), vec![1]), ("b".to_string(), vec![3, 4])]
        );
    }

    #[test]
    #[traced_test]
    fn test_short_response_drops_rest_of_window() {
        let schema = table(&[("a", 0, 1), ("b", 1, 2), ("c", 3, 1)]);
        let points = schema.points(RegisterKind::Input);
        let window = &WindowPlanner::default().plan(points, &["a", "b", "c"])[0];
        let (sliced, missing) = slice_window(points, window, &[7, 8]);
        assert_eq!(sliced, vec![("a".to_string(), vec![7])]);
        assert_eq!(missing, vec!["b", "c"]);
        assert!(logs_contain("Short response at 0"));
    }
}
