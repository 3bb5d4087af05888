//! GPS point resolution against the spatial hierarchy.

use crate::constants::gps;
use crate::error::{Error, Result};
use crate::spatial::{SpatialHierarchy, SpatialNode};
use geo::{Intersects, Point};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A GPS point with explicitly named axes.
///
/// Longitude and latitude are never accepted positionally; construction
/// through named fields is the whole point of this type. Axis-order
/// confusion between storage and query paths does not survive a named
/// struct.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    /// Signed longitude in degrees, west negative.
    pub longitude: f64,
    /// Signed latitude in degrees, south negative.
    pub latitude: f64,
}

impl GpsPoint {
    /// Validate coordinate bounds.
    pub fn validate(&self) -> Result<()> {
        if !(gps::LON_MIN..=gps::LON_MAX).contains(&self.longitude) {
            return Err(Error::InvalidLongitude {
                value: self.longitude,
            });
        }
        if !(gps::LAT_MIN..=gps::LAT_MAX).contains(&self.latitude) {
            return Err(Error::InvalidLatitude {
                value: self.latitude,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for GpsPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(lon {:.4}, lat {:.4})", self.longitude, self.latitude)
    }
}

/// Resolve a GPS point to the most specific containing node.
///
/// Walks warehouse → area → location → bin, descending only into children
/// of a matched parent. Containment is boundary-inclusive; when a point
/// sits exactly on a shared boundary between siblings, the first sibling
/// in insertion order wins. `Ok(None)` means no warehouse contains the
/// point: a reported outcome the caller must handle, not a failure.
pub fn resolve<'a>(
    hierarchy: &'a SpatialHierarchy,
    point: &GpsPoint,
) -> Result<Option<&'a SpatialNode>> {
    point.validate()?;
    let p = Point::new(point.longitude, point.latitude);

    let mut resolved: Option<&SpatialNode> = None;
    let mut candidates: Vec<&SpatialNode> = hierarchy.roots().collect();

    while let Some(node) = candidates.iter().copied().find(|n| n.polygon.intersects(&p)) {
        debug!(node = %node.id, level = %node.level, "Point contained");
        resolved = Some(node);
        candidates = hierarchy.children_of(&node.id).collect();
    }

    Ok(resolved)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::spatial::HierarchyLevel;
    use crate::spatial::tests::{node, square};

    /// Hierarchy around Mendoza: a warehouse containing an area
    /// containing a location, plus a bin far from the test point.
    fn nested_hierarchy() -> SpatialHierarchy {
        let mut h = SpatialHierarchy::new();
        h.insert(node(
            "w1",
            HierarchyLevel::Warehouse,
            None,
            square(-68.7, -33.0, 0.5),
        ))
        .unwrap();
        h.insert(node(
            "a1",
            HierarchyLevel::Area,
            Some("w1"),
            square(-68.7, -33.04, 0.1),
        ))
        .unwrap();
        h.insert(node(
            "l1",
            HierarchyLevel::Location,
            Some("a1"),
            square(-68.701, -33.043, 0.01),
        ))
        .unwrap();
        h.insert(node(
            "b1",
            HierarchyLevel::Bin,
            Some("l1"),
            square(-68.72, -33.05, 0.001),
        ))
        .unwrap();
        h
    }

    #[test]
    fn test_resolves_most_specific_node() {
        let hierarchy = nested_hierarchy();
        let point = GpsPoint {
            longitude: -68.701,
            latitude: -33.043,
        };

        let resolved = resolve(&hierarchy, &point).unwrap().unwrap();
        // Inside l1 but not inside its only bin: the location wins, not
        // the enclosing area or warehouse.
        assert_eq!(resolved.id.as_str(), "l1");
        assert_eq!(resolved.level, HierarchyLevel::Location);
    }

    #[test]
    fn test_point_outside_every_warehouse_is_not_found() {
        let hierarchy = nested_hierarchy();
        let point = GpsPoint {
            longitude: 2.35,
            latitude: 48.85,
        };
        assert!(resolve(&hierarchy, &point).unwrap().is_none());
    }

    #[test]
    fn test_invalid_coordinates_rejected() {
        let hierarchy = nested_hierarchy();
        assert!(matches!(
            resolve(
                &hierarchy,
                &GpsPoint {
                    longitude: -190.0,
                    latitude: 0.0
                }
            ),
            Err(Error::InvalidLongitude { .. })
        ));
        assert!(matches!(
            resolve(
                &hierarchy,
                &GpsPoint {
                    longitude: 0.0,
                    latitude: 91.0
                }
            ),
            Err(Error::InvalidLatitude { .. })
        ));
    }

    #[test]
    fn test_shared_boundary_resolves_to_first_inserted() {
        // Two sibling areas sharing the lon = -68.6 edge.
        let mut h = SpatialHierarchy::new();
        h.insert(node(
            "w1",
            HierarchyLevel::Warehouse,
            None,
            square(-68.6, -33.0, 1.0),
        ))
        .unwrap();
        h.insert(node(
            "a-east",
            HierarchyLevel::Area,
            Some("w1"),
            square(-68.5, -33.0, 0.1),
        ))
        .unwrap();
        h.insert(node(
            "a-west",
            HierarchyLevel::Area,
            Some("w1"),
            square(-68.7, -33.0, 0.1),
        ))
        .unwrap();

        // Exactly on the shared edge between a-east and a-west.
        let point = GpsPoint {
            longitude: -68.6,
            latitude: -33.0,
        };
        let resolved = resolve(&h, &point).unwrap().unwrap();
        assert_eq!(resolved.id.as_str(), "a-east");

        // Deterministic across repeated calls.
        for _ in 0..10 {
            assert_eq!(
                resolve(&h, &point).unwrap().unwrap().id.as_str(),
                "a-east"
            );
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let hierarchy = nested_hierarchy();
        let point = GpsPoint {
            longitude: -68.701,
            latitude: -33.043,
        };
        let first = resolve(&hierarchy, &point).unwrap().unwrap().id.clone();
        for _ in 0..20 {
            assert_eq!(resolve(&hierarchy, &point).unwrap().unwrap().id, first);
        }
    }
}
