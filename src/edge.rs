//! Weighted edges shared by the area-market and market-market networks.
use crate::bird::BirdType;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A directed, weighted edge between two nodes of the distribution network
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedEdge {
    /// Index of the source node
    pub source: u32,
    /// Index of the destination node
    pub dest: u32,
    /// Weight of the edge (non-negative)
    pub weight: f64,
    /// The bird type carried along this edge
    pub bird_type: BirdType,
}

impl WeightedEdge {
    /// Create a new [`WeightedEdge`]
    pub fn new(source: u32, dest: u32, weight: f64, bird_type: BirdType) -> Self {
        Self {
            source,
            dest,
            weight,
            bird_type,
        }
    }
}

/// Write edges to `writer` as whitespace-delimited `source dest weight bird_type` lines
pub fn write_edges<W: Write>(writer: &mut W, edges: &[WeightedEdge]) -> Result<()> {
    for edge in edges {
        writeln!(
            writer,
            "{} {} {} {}",
            edge.source, edge.dest, edge.weight, edge.bird_type
        )?;
    }

    Ok(())
}

/// Write edges to a text file, replacing any existing file
pub fn write_edge_file(file_path: &Path, edges: &[WeightedEdge]) -> Result<()> {
    let file = File::create(file_path)
        .with_context(|| format!("Could not create {}", file_path.display()))?;
    let mut writer = BufWriter::new(file);
    write_edges(&mut writer, edges)?;
    writer.flush()?;

    Ok(())
}
