//! Positional state of a tour: cyclic position embeddings, visit indices and
//! the two most recently opened pickups seen by every node.
//!
//! The stack bookkeeping is a fold over the visiting sequence. Each step
//! yields an immutable [`StackSnapshot`]; the only mutable state is the
//! per-pickup `opened_at` table owned by the fold itself.

use crate::error::{ensure_dim, Result};
use crate::problem::{node_kind, NodeKind};
use crate::tour::Tour;
use log::debug;
use ndarray::{Array2, Array3, Axis};
use std::f64::consts::PI;

/// Offsets averaged when smoothing the pattern table.
const POOLING_OFFSETS: [isize; 5] = [-2, -1, 0, 1, 2];
/// Sampling resolution of the underlying waveforms.
const WAVE_STEP: f64 = 0.01;

/// Superposed sine/cosine table of shape `(seq_length, dim)`, periodic over
/// the tour length.
#[derive(Debug, Clone)]
pub struct CyclicPattern {
    table: Array2<f64>,
}

impl CyclicPattern {
    pub fn new(seq_length: usize, dim: usize) -> Self {
        let half = (dim / 2).max(1);
        let td_base = (seq_length as f64).powf(1.0 / half as f64);
        let td_set: Vec<f64> = linspace(td_base, seq_length as f64, half)
            .into_iter()
            .map(f64::trunc)
            .collect();

        let mut raw = Array2::<f64>::zeros((seq_length, dim));
        for d in 0..dim {
            let slot = d / 3 * 3 + 1;
            let td = (if slot < half { td_set[slot] } else { td_set[half - 1] }).max(1.0);
            let span = (seq_length as f64 / td).ceil() * td;
            let samples = (span / WAVE_STEP).round() as usize;
            let omega = 2.0 * PI / td;
            let phase = if d <= half {
                0.0
            } else {
                2.0 * PI * ((half as f64 - d as f64) / half as f64)
            };

            for r in 0..seq_length {
                let x = (r * samples / seq_length) as f64 * WAVE_STEP;
                let angle = omega * ((x.rem_euclid(2.0 * td)) - td).abs() + phase;
                raw[[r, d]] = if d % 2 == 1 { angle.cos() } else { angle.sin() };
            }
        }

        // average neighbouring rows cyclically, then centre each column
        let column_mean = raw.mean_axis(Axis(0)).unwrap_or_else(|| ndarray::Array1::zeros(dim));
        let len = seq_length as isize;
        let mut table = Array2::<f64>::zeros((seq_length, dim));
        for r in 0..seq_length {
            let mut row = table.row_mut(r);
            for offset in POOLING_OFFSETS {
                let src = (r as isize + offset).rem_euclid(len) as usize;
                row += &raw.row(src);
            }
            row.mapv_inplace(|v| v / POOLING_OFFSETS.len() as f64);
            row -= &column_mean;
        }

        CyclicPattern { table }
    }

    pub fn seq_length(&self) -> usize {
        self.table.nrows()
    }

    pub fn dim(&self) -> usize {
        self.table.ncols()
    }

    pub fn table(&self) -> &Array2<f64> {
        &self.table
    }
}

fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..num)
            .map(|i| start + (stop - start) * i as f64 / (num - 1) as f64)
            .collect(),
    }
}

/// Visit index and LIFO view captured when one node is visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSnapshot {
    pub node: usize,
    pub visit_index: usize,
    /// Most and second most recently opened pickups still on board after
    /// visiting `node`; `0` stands for "nothing open".
    pub top2: [usize; 2],
}

/// Per-pickup opening table (slot `k` belongs to pickup `k`, slot 0 is the depot).
#[derive(Debug, Clone)]
struct StackState {
    opened_at: Vec<Option<usize>>,
}

impl StackState {
    fn new(pairs: usize) -> Self {
        StackState {
            opened_at: vec![None; pairs + 1],
        }
    }

    fn visit(&mut self, node: usize, visit_index: usize, pairs: usize) {
        match node_kind(node, pairs) {
            NodeKind::Depot => {}
            NodeKind::Pickup => self.opened_at[node] = Some(visit_index),
            NodeKind::Delivery => self.opened_at[node - pairs] = None,
        }
    }

    /// Two open pickups with the largest opening index; visit indices are
    /// unique, so the ranking is total and the fallback is always the depot.
    fn top2(&self) -> [usize; 2] {
        let mut best: [(usize, usize); 2] = [(0, 0); 2];
        let mut found = 0;
        for (slot, opened) in self.opened_at.iter().enumerate().skip(1) {
            if let Some(at) = *opened {
                if found == 0 || at > best[0].1 {
                    best[1] = best[0];
                    best[0] = (slot, at);
                } else if found == 1 || at > best[1].1 {
                    best[1] = (slot, at);
                }
                found += 1;
            }
        }
        match found {
            0 => [0, 0],
            1 => [best[0].0, 0],
            _ => [best[0].0, best[1].0],
        }
    }
}

/// Fold over a visiting sequence; `base` is the visit index given to the first node.
pub fn fold_stack_states(sequence: &[usize], pairs: usize, base: usize) -> Vec<StackSnapshot> {
    sequence
        .iter()
        .enumerate()
        .scan(StackState::new(pairs), |state, (i, &node)| {
            let visit_index = base + i;
            state.visit(node, visit_index, pairs);
            Some(StackSnapshot {
                node,
                visit_index,
                top2: state.top2(),
            })
        })
        .collect()
}

/// Visiting sequence starting at the depot's successor and ending at the depot.
pub fn visit_sequence(tour: &Tour) -> Vec<usize> {
    let mut sequence = tour.sequence();
    sequence.rotate_left(1);
    sequence
}

/// Derived, read-only positional view of one tour.
#[derive(Debug, Clone)]
pub struct PositionalState {
    /// 1-based rank of every node, the depot being last (`2n+1`)
    pub visit_index: Vec<usize>,
    /// Stack top-2 per node, when requested
    pub top2: Option<Vec<[usize; 2]>>,
    /// `(nodes, dim)` rows of the pattern table
    pub embedding: Array2<f64>,
}

impl PositionalState {
    /// Visit index modulo the tour length: the depot becomes 0 and sorts first.
    pub fn cyclic_index(&self, node: usize) -> usize {
        self.visit_index[node] % self.visit_index.len()
    }

    pub fn cyclic_indices(&self) -> Vec<usize> {
        (0..self.visit_index.len())
            .map(|node| self.cyclic_index(node))
            .collect()
    }
}

/// Computes [`PositionalState`] for tours of a fixed length.
#[derive(Debug, Clone)]
pub struct PositionalEncoder {
    pattern: CyclicPattern,
}

impl PositionalEncoder {
    pub fn new(seq_length: usize, dim: usize) -> Self {
        debug!("building cyclic pattern table ({seq_length} x {dim})");
        PositionalEncoder {
            pattern: CyclicPattern::new(seq_length, dim),
        }
    }

    pub fn pattern(&self) -> &CyclicPattern {
        &self.pattern
    }

    /// Simulate one pass over the tour.
    pub fn encode(&self, tour: &Tour, calc_stacks: bool) -> Result<PositionalState> {
        let nodes = self.pattern.seq_length();
        ensure_dim("tour length", tour.len(), nodes)?;
        let pairs = nodes / 2;

        let snapshots = fold_stack_states(&visit_sequence(tour), pairs, 1);
        let mut visit_index = vec![0; nodes];
        let mut top2 = vec![[0, 0]; nodes];
        for snap in &snapshots {
            visit_index[snap.node] = snap.visit_index;
            top2[snap.node] = snap.top2;
        }

        let table = self.pattern.table();
        let mut embedding = Array2::zeros((nodes, self.pattern.dim()));
        for (node, &index) in visit_index.iter().enumerate() {
            embedding.row_mut(node).assign(&table.row(index % nodes));
        }

        Ok(PositionalState {
            visit_index,
            top2: calc_stacks.then_some(top2),
            embedding,
        })
    }

    pub fn encode_batch(&self, tours: &[Tour], calc_stacks: bool) -> Result<Vec<PositionalState>> {
        tours
            .iter()
            .map(|tour| self.encode(tour, calc_stacks))
            .collect()
    }
}

/// Stack the per-instance embeddings into `(batch, nodes, dim)`.
pub fn batch_embeddings(states: &[PositionalState]) -> Array3<f64> {
    let (nodes, dim) = states
        .first()
        .map(|s| s.embedding.dim())
        .unwrap_or((0, 0));
    let mut out = Array3::zeros((states.len(), nodes, dim));
    for (b, state) in states.iter().enumerate() {
        out.index_axis_mut(Axis(0), b).assign(&state.embedding);
    }
    out
}
