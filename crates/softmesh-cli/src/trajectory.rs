//! Reader for multi-frame `.xyz` trajectories.
//!
//! Each frame is a plain XYZ block:
//! ```text
//! <num_particles>
//! <comment line>
//! <label> <x> <y> <z>
//! ...
//! ```
//! Frames follow each other without separators. Labels are species names;
//! coordinates are taken in the box units as they are.

use std::path::Path;

use thiserror::Error;

/// Errors during trajectory parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    FormatError { line: usize, message: String },
}

/// One trajectory frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub comment: String,
    pub labels: Vec<String>,
    pub positions: Vec<[f64; 3]>,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.positions.len()
    }
}

/// Parse every frame of an XYZ trajectory.
pub fn parse_trajectory(content: &str) -> Result<Vec<Frame>, ParseError> {
    let lines: Vec<&str> = content.lines().collect();
    let mut frames = Vec::new();
    let mut cursor = 0;

    loop {
        // Skip blank lines between frames.
        while cursor < lines.len() && lines[cursor].trim().is_empty() {
            cursor += 1;
        }
        if cursor == lines.len() {
            break;
        }

        let header = cursor + 1;
        let count: usize = lines[cursor].trim().parse().map_err(|_| ParseError::FormatError {
            line: header,
            message: format!("Expected the particle count of frame {}, got '{}'", frames.len(), lines[cursor].trim()),
        })?;
        if cursor + 1 >= lines.len() {
            return Err(ParseError::FormatError {
                line: header,
                message: "Frame ends before its comment line".into(),
            });
        }
        let comment = lines[cursor + 1].trim().to_string();
        cursor += 2;

        let mut labels = Vec::with_capacity(count);
        let mut positions = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(line) = lines.get(cursor) else {
                return Err(ParseError::FormatError {
                    line: header,
                    message: format!("Header says {} particles but found {}", count, positions.len()),
                });
            };
            let (label, position) = parse_particle(line, cursor + 1)?;
            labels.push(label);
            positions.push(position);
            cursor += 1;
        }

        frames.push(Frame {
            comment,
            labels,
            positions,
        });
    }

    Ok(frames)
}

fn parse_particle(line: &str, number: usize) -> Result<(String, [f64; 3]), ParseError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(ParseError::FormatError {
            line: number,
            message: format!("Expected 'label x y z', got '{}'", line.trim()),
        });
    }
    let mut position = [0.0; 3];
    for (a, (value, axis)) in parts[1..4].iter().zip(["x", "y", "z"]).enumerate() {
        position[a] = value.parse().map_err(|_| ParseError::FormatError {
            line: number,
            message: format!("Invalid {} coordinate: {}", axis, value),
        })?;
    }
    Ok((parts[0].to_string(), position))
}

/// Read and parse a trajectory file.
pub fn read_trajectory(path: &Path) -> Result<Vec<Frame>, ParseError> {
    let content = std::fs::read_to_string(path)?;
    parse_trajectory(&content)
}
