//! Spatial hierarchy types and GPS point resolution.
//!
//! The hierarchy is a 4-level nesting of polygons (warehouse → area →
//! location → bin) maintained by an external collaborator and read-only
//! here. Nodes are kept in insertion order; that order is the documented,
//! deterministic tie-break when a point sits exactly on a shared boundary
//! between siblings.

mod resolver;

pub use resolver::{GpsPoint, resolve};

use crate::error::{Error, Result};
use geo::{LineString, Polygon};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Identifier of a spatial node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Nesting level of a spatial node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyLevel {
    /// Top-level site.
    Warehouse,
    /// Growing area within a warehouse.
    Area,
    /// Location within an area.
    Location,
    /// Bin within a location.
    Bin,
}

impl HierarchyLevel {
    /// The level nested directly below this one.
    pub fn child(self) -> Option<Self> {
        match self {
            Self::Warehouse => Some(Self::Area),
            Self::Area => Some(Self::Location),
            Self::Location => Some(Self::Bin),
            Self::Bin => None,
        }
    }
}

impl std::fmt::Display for HierarchyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warehouse => write!(f, "warehouse"),
            Self::Area => write!(f, "area"),
            Self::Location => write!(f, "location"),
            Self::Bin => write!(f, "bin"),
        }
    }
}

/// One node of the spatial hierarchy.
#[derive(Debug, Clone)]
pub struct SpatialNode {
    /// Node identifier, unique across the hierarchy.
    pub id: NodeId,
    /// Nesting level.
    pub level: HierarchyLevel,
    /// Boundary polygon in (longitude, latitude) coordinates.
    pub polygon: Polygon<f64>,
    /// Parent node; `None` only for warehouses.
    pub parent: Option<NodeId>,
}

/// Read-only snapshot of the spatial hierarchy.
#[derive(Debug, Default)]
pub struct SpatialHierarchy {
    nodes: Vec<SpatialNode>,
    index_by_id: HashMap<NodeId, usize>,
    children: HashMap<NodeId, Vec<usize>>,
    roots: Vec<usize>,
}

impl SpatialHierarchy {
    /// Create an empty hierarchy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, validating structure.
    ///
    /// Nodes must arrive with unique ids; a non-warehouse node's parent
    /// must already exist and sit exactly one level above it. Insertion
    /// order is preserved and is the resolver's tie-break order.
    pub fn insert(&mut self, node: SpatialNode) -> Result<()> {
        if self.index_by_id.contains_key(&node.id) {
            return Err(Error::HierarchyInvalid {
                message: format!("duplicate node id '{}'", node.id),
            });
        }

        if node.polygon.exterior().0.len() < 4 {
            // A closed ring needs at least 3 distinct vertices.
            return Err(Error::HierarchyInvalid {
                message: format!("node '{}' polygon has fewer than 3 vertices", node.id),
            });
        }

        match (&node.parent, node.level) {
            (None, HierarchyLevel::Warehouse) => {}
            (None, level) => {
                return Err(Error::HierarchyInvalid {
                    message: format!("{level} node '{}' has no parent", node.id),
                });
            }
            (Some(parent_id), level) => {
                let parent = self.get(parent_id).ok_or_else(|| Error::HierarchyInvalid {
                    message: format!("node '{}' references unknown parent '{parent_id}'", node.id),
                })?;
                if parent.level.child() != Some(level) {
                    return Err(Error::HierarchyInvalid {
                        message: format!(
                            "node '{}' is a {level} but its parent '{parent_id}' is a {}",
                            node.id, parent.level
                        ),
                    });
                }
            }
        }

        let index = self.nodes.len();
        self.index_by_id.insert(node.id.clone(), index);
        match &node.parent {
            None => self.roots.push(index),
            Some(parent_id) => self
                .children
                .entry(parent_id.clone())
                .or_default()
                .push(index),
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Look up a node by id.
    pub fn get(&self, id: &NodeId) -> Option<&SpatialNode> {
        self.index_by_id.get(id).map(|&i| &self.nodes[i])
    }

    /// Warehouses, in insertion order.
    pub fn roots(&self) -> impl Iterator<Item = &SpatialNode> {
        self.roots.iter().map(|&i| &self.nodes[i])
    }

    /// Children of a node, in insertion order.
    pub fn children_of(&self, id: &NodeId) -> impl Iterator<Item = &SpatialNode> {
        self.children
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|&i| &self.nodes[i])
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the hierarchy has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Load a hierarchy snapshot from a JSON file.
    ///
    /// The snapshot is an array of `{id, level, parent, polygon}` records
    /// with polygons as `[longitude, latitude]` vertex lists; record order
    /// defines insertion order.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::HierarchyRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let records: Vec<NodeRecord> =
            serde_json::from_str(&contents).map_err(|e| Error::HierarchyParse {
                path: path.to_path_buf(),
                source: e,
            })?;

        let mut hierarchy = Self::new();
        for record in records {
            hierarchy.insert(record.into_node())?;
        }
        Ok(hierarchy)
    }
}

/// Serialized form of one node in a hierarchy snapshot.
#[derive(Debug, Deserialize)]
struct NodeRecord {
    id: String,
    level: HierarchyLevel,
    #[serde(default)]
    parent: Option<String>,
    /// Exterior ring as explicit `[longitude, latitude]` pairs.
    polygon: Vec<[f64; 2]>,
}

impl NodeRecord {
    fn into_node(self) -> SpatialNode {
        let ring: Vec<(f64, f64)> = self.polygon.iter().map(|&[lon, lat]| (lon, lat)).collect();
        SpatialNode {
            id: NodeId::new(self.id),
            level: self.level,
            polygon: Polygon::new(LineString::from(ring), Vec::new()),
            parent: self.parent.map(NodeId::new),
        }
    }
}
