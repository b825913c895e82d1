//! Utility functions for persistence, reporting and visualisation.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::problem::{NodeKind, Problem};
use crate::tour::Tour;

/// Format a duration as hours, minutes, and seconds.
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}h {:02}m {:02}s", hours, minutes, seconds)
}

/// Write any serialisable value as pretty JSON.
pub fn save_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

/// Read a value written with [`save_json`].
pub fn load_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Save a tour to a file.
pub fn save_tour<P: AsRef<Path>>(tour: &Tour, problem: &Problem, path: P) -> Result<()> {
    let mut file = File::create(path)?;

    writeln!(file, "PDP-LIFO Tour for instance: {}", problem.name)?;
    writeln!(file, "Total Distance: {:.2}", tour.cost(problem))?;
    writeln!(file, "Precedence Feasible: {}", tour.is_precedence_feasible(problem.pairs))?;
    writeln!(file, "LIFO Feasible: {}", tour.is_lifo_feasible(problem.pairs))?;
    writeln!(file)?;

    let sequence = tour.sequence();
    write!(file, "0")?;
    for &node in sequence.iter().skip(1) {
        write!(file, " -> {}", node)?;
    }
    writeln!(file, " -> 0")?;

    Ok(())
}

/// Generate statistics about the search process.
#[derive(Debug, Clone)]
pub struct SearchStatistics {
    pub steps: usize,
    pub runtime: Duration,
    pub initial_cost: f64,
    pub best_cost: f64,
    pub improving_steps: usize,
}

impl SearchStatistics {
    /// Relative improvement of the best tour over the initial one.
    pub fn improvement(&self) -> f64 {
        if self.initial_cost > 0.0 {
            (self.initial_cost - self.best_cost) / self.initial_cost
        } else {
            0.0
        }
    }

    /// Format the statistics as a string.
    pub fn format(&self) -> String {
        format!(
            "Search Statistics:
- Steps: {}
- Runtime: {}
- Initial Cost: {:.2}
- Best Cost: {:.2}
- Improvement: {:.2}%
- Improving Steps: {}",
            self.steps,
            format_duration(self.runtime),
            self.initial_cost,
            self.best_cost,
            100.0 * self.improvement(),
            self.improving_steps
        )
    }
}

/// Print tour visualization to console.
pub fn print_tour_visualization(tour: &Tour, problem: &Problem) {
    println!("Tour Visualization for {}", problem.name);
    println!("Total Distance: {:.2}", tour.cost(problem));
    println!();

    let mut min_x = f64::MAX;
    let mut min_y = f64::MAX;
    let mut max_x = f64::MIN;
    let mut max_y = f64::MIN;

    for node in &problem.nodes {
        min_x = min_x.min(node.x);
        min_y = min_y.min(node.y);
        max_x = max_x.max(node.x);
        max_y = max_y.max(node.y);
    }
    let span_x = (max_x - min_x).max(f64::EPSILON);
    let span_y = (max_y - min_y).max(f64::EPSILON);

    let width = 80;
    let height = 25;
    let mut grid = vec![vec![' '; width]; height];

    for node in &problem.nodes {
        let x = ((node.x - min_x) / span_x * (width as f64 - 1.0)) as usize;
        let y = ((node.y - min_y) / span_y * (height as f64 - 1.0)) as usize;
        grid[y][x] = match node.kind {
            NodeKind::Depot => 'D',
            NodeKind::Pickup => 'P',
            NodeKind::Delivery => 'd',
        };
    }

    for row in &grid {
        println!("{}", row.iter().collect::<String>());
    }
    println!();

    println!("Legend:");
    println!("D - Depot");
    println!("P - Pickup");
    println!("d - Delivery");
    println!("Order: {:?}", tour);
    println!();
}
