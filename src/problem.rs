//! Problem definition and data structures for the pickup-and-delivery TSP.

use crate::error::{Error, Result};
use ndarray::{Array2, Array3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead};
use std::path::Path;

/// Role of a node within a request pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Depot,
    Pickup,
    Delivery,
}

/// Represents a stop (depot, pickup or delivery).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub kind: NodeKind,
}

impl Node {
    /// Create a new node.
    pub fn new(id: usize, x: f64, y: f64, kind: NodeKind) -> Self {
        Node { id, x, y, kind }
    }

    /// Calculate the Euclidean distance between two nodes.
    pub fn distance(&self, other: &Node) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A PDP instance with `pairs` requests and `2 * pairs + 1` nodes.
///
/// Node `0` is the depot, nodes `1..=pairs` are pickups and pickup `k` is
/// served by delivery `k + pairs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub name: String,
    pub pairs: usize,
    pub nodes: Vec<Node>,
    pub distance_matrix: Vec<Vec<f64>>,
}

impl Problem {
    /// Build an instance from depot-first coordinates.
    pub fn new(name: String, coordinates: &[(f64, f64)]) -> Result<Self> {
        if coordinates.len() < 3 || coordinates.len() % 2 == 0 {
            return Err(Error::shape_mismatch(format!(
                "a PDP instance needs 2n+1 >= 3 nodes, got {}",
                coordinates.len()
            )));
        }
        let pairs = coordinates.len() / 2;
        let nodes: Vec<Node> = coordinates
            .iter()
            .enumerate()
            .map(|(id, &(x, y))| Node::new(id, x, y, node_kind(id, pairs)))
            .collect();
        let distance_matrix = Self::compute_distance_matrix(&nodes);

        Ok(Problem {
            name,
            pairs,
            nodes,
            distance_matrix,
        })
    }

    /// Uniformly random coordinates in the unit square.
    pub fn random<R: Rng + ?Sized>(name: String, pairs: usize, rng: &mut R) -> Result<Self> {
        let coordinates: Vec<(f64, f64)> = (0..2 * pairs + 1)
            .map(|_| (rng.gen::<f64>(), rng.gen::<f64>()))
            .collect();
        Problem::new(name, &coordinates)
    }

    /// Number of nodes including the depot.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Calculate the distance between two node indices.
    pub fn get_distance(&self, from: usize, to: usize) -> f64 {
        self.distance_matrix[from][to]
    }

    /// The other member of a request pair (the depot pairs with itself).
    pub fn partner(&self, node: usize) -> usize {
        partner(node, self.pairs)
    }

    /// Node coordinates as a `(nodes, 2)` feature matrix.
    pub fn features(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.nodes.len(), 2), |(i, c)| {
            if c == 0 {
                self.nodes[i].x
            } else {
                self.nodes[i].y
            }
        })
    }

    /// Generate the full distance matrix for all nodes.
    fn compute_distance_matrix(nodes: &[Node]) -> Vec<Vec<f64>> {
        let n = nodes.len();
        let mut matrix = vec![vec![0.0; n]; n];

        for i in 0..n {
            for j in 0..n {
                if i != j {
                    matrix[i][j] = nodes[i].distance(&nodes[j]);
                }
            }
        }

        matrix
    }

    /// Load an instance: a name line followed by one `x y` line per node,
    /// depot first, then all pickups, then all deliveries.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = io::BufReader::new(file);
        let mut lines = reader.lines();

        let name = match lines.next() {
            Some(line) => line?.trim().to_string(),
            None => return Err(Error::shape_mismatch("empty instance file")),
        };

        let mut coordinates = Vec::new();
        for line_result in lines {
            let line = line_result?;
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                continue;
            }
            let parse = |s: &str| {
                s.parse::<f64>()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            };
            coordinates.push((parse(parts[0])?, parse(parts[1])?));
        }

        Problem::new(name, &coordinates)
    }
}

/// Kind of node `id` in an instance with `pairs` requests.
pub fn node_kind(id: usize, pairs: usize) -> NodeKind {
    if id == 0 {
        NodeKind::Depot
    } else if id <= pairs {
        NodeKind::Pickup
    } else {
        NodeKind::Delivery
    }
}

/// Pair partner of `node`; the depot maps to itself.
pub fn partner(node: usize, pairs: usize) -> usize {
    match node_kind(node, pairs) {
        NodeKind::Depot => 0,
        NodeKind::Pickup => node + pairs,
        NodeKind::Delivery => node - pairs,
    }
}

/// Stack the features of equally sized instances into `(batch, nodes, 2)`.
pub fn batch_features(problems: &[Problem]) -> Result<Array3<f64>> {
    let first = problems
        .first()
        .ok_or_else(|| Error::shape_mismatch("empty batch"))?;
    let nodes = first.node_count();
    let mut out = Array3::zeros((problems.len(), nodes, 2));
    for (b, problem) in problems.iter().enumerate() {
        if problem.node_count() != nodes {
            return Err(Error::shape_mismatch(format!(
                "instance {} has {} nodes, batch expects {}",
                b,
                problem.node_count(),
                nodes
            )));
        }
        out.index_axis_mut(ndarray::Axis(0), b)
            .assign(&problem.features());
    }
    Ok(out)
}
