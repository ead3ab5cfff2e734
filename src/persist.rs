use itertools::Itertools;
use ndarray::Array2;
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use crate::error::{Result, TrainerError};
use crate::network::Parameters;

// One file per tensor, matching what downstream inference consumers expect.
const FILE_NAMES: [&str; 4] = ["W1.txt", "b1.txt", "W2.txt", "b2.txt"];

/// Writes the four parameter tensors to `dir` as flat plain-text files: one
/// matrix row per line, values space-delimited, no header. `f64` values are
/// printed in their shortest round-trippable form, so a reload reproduces
/// the tensors exactly.
pub fn save_parameters(params: &Parameters, dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    let tensors = [&params.w1, &params.b1, &params.w2, &params.b2];
    for (name, tensor) in FILE_NAMES.iter().zip(tensors) {
        write_matrix(&dir.join(name), tensor)?;
    }
    Ok(())
}

/// Reads back a parameter set previously written by [`save_parameters`].
pub fn load_parameters(dir: impl AsRef<Path>) -> Result<Parameters> {
    let dir = dir.as_ref();
    let w1 = read_matrix(&dir.join(FILE_NAMES[0]))?;
    let b1 = read_matrix(&dir.join(FILE_NAMES[1]))?;
    let w2 = read_matrix(&dir.join(FILE_NAMES[2]))?;
    let b2 = read_matrix(&dir.join(FILE_NAMES[3]))?;

    // The four tensors are only usable together if their layer widths line
    // up, so check that before handing them back.
    if b1.dim() != (1, w1.ncols()) || w2.nrows() != w1.ncols() || b2.dim() != (1, w2.ncols()) {
        return Err(TrainerError::ShapeMismatch {
            context: "loaded parameters",
            expected: format!(
                "b1 (1 x {}), W2 ({} x _), b2 (1 x _)",
                w1.ncols(),
                w1.ncols()
            ),
            found: format!(
                "b1 {:?}, W2 {:?}, b2 {:?}",
                b1.dim(),
                w2.dim(),
                b2.dim()
            ),
        });
    }

    Ok(Parameters { w1, b1, w2, b2 })
}

fn write_matrix(path: &Path, matrix: &Array2<f64>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for row in matrix.rows() {
        writeln!(writer, "{}", row.iter().format(" "))?;
    }
    writer.flush()?;
    Ok(())
}

fn read_matrix(path: &Path) -> Result<Array2<f64>> {
    let reader = BufReader::new(File::open(path)?);
    let mut values = Vec::new();
    let mut rows = 0usize;
    let mut columns = None;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: Vec<f64> = line
            .split_whitespace()
            .map(|token| {
                token.parse::<f64>().map_err(|_| {
                    TrainerError::Format(format!(
                        "unparseable value {token:?} in {}",
                        path.display()
                    ))
                })
            })
            .collect::<Result<_>>()?;
        match columns {
            None => columns = Some(row.len()),
            Some(expected) if expected != row.len() => {
                return Err(TrainerError::Format(format!(
                    "ragged rows in {}: {} values after rows of {}",
                    path.display(),
                    row.len(),
                    expected
                )));
            }
            Some(_) => {}
        }
        values.extend(row);
        rows += 1;
    }
    let columns = columns.ok_or_else(|| {
        TrainerError::Format(format!("no numeric rows in {}", path.display()))
    })?;
    Array2::from_shape_vec((rows, columns), values)
        .map_err(|e| TrainerError::Format(format!("bad matrix shape in {}: {e}", path.display())))
}
