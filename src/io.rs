use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use sprs::io::{read_matrix_market_from_bufread, IoError};
use tracing::{debug, warn};

use crate::matrix::{DistributedMatrix, DistributionScheme, SparseMatrix, Triplet};

// Rewrite a coordinate matrix market file as `real general`. Pattern entries
// get the value 1 and the mirrored half of symmetric and skew-symmetric files
// is spelled out, negated for skew. Diagonal entries are never mirrored.
fn expand_matrix_market<R: BufRead>(reader: R) -> io::Result<String> {
    let mut lines = reader.lines().enumerate();

    let header = match lines.next() {
        Some((_, line)) => line?.to_lowercase(),
        None => return Err(bad_data(1, "empty matrix market file")),
    };
    let fields: Vec<&str> = header.split_whitespace().collect();
    if fields.len() != 5 || fields[0] != "%%matrixmarket" || fields[1] != "matrix" || fields[2] != "coordinate" {
        return Err(bad_data(1, "expected a coordinate matrix market header"));
    }
    let pattern = match fields[3] {
        "real" | "integer" => false,
        "pattern" => true,
        _ => return Err(bad_data(1, "unsupported value type")),
    };
    let (mirror, negate) = match fields[4] {
        "general" => (false, false),
        "symmetric" => (true, false),
        "skew-symmetric" | "skew_symmetric" => (true, true),
        _ => return Err(bad_data(1, "unsupported symmetry")),
    };

    let mut dimensions: Option<(usize, usize)> = None;
    let mut entries: Vec<(usize, usize, f64)> = Vec::new();
    for (index, line) in lines {
        let line = line?;
        let line_number = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }

        let mut tokens = trimmed.split_whitespace();
        let mut index_field = || -> io::Result<usize> {
            tokens
                .next()
                .and_then(|token| token.parse::<usize>().ok())
                .ok_or_else(|| bad_data(line_number, "expected a non-negative integer"))
        };
        let (a, b) = (index_field()?, index_field()?);

        if dimensions.is_none() {
            dimensions = Some((a, b));
            continue;
        }

        let value = if pattern {
            1.0
        } else {
            tokens
                .next()
                .and_then(|token| token.parse::<f64>().ok())
                .ok_or_else(|| bad_data(line_number, "expected a value"))?
        };
        entries.push((a, b, value));
        if mirror && a != b {
            entries.push((b, a, if negate { -value } else { value }));
        }
    }

    let (rows, cols) = dimensions.ok_or_else(|| bad_data(0, "missing dimension line"))?;
    let mut expanded = String::from("%%MatrixMarket matrix coordinate real general\n");
    expanded.push_str(&format!("{rows} {cols} {}\n", entries.len()));
    for (row, col, value) in entries {
        expanded.push_str(&format!("{row} {col} {value:?}\n"));
    }
    Ok(expanded)
}

/// Read a matrix market file and spread its nonzeros over `procs` images.
///
/// Real, integer and pattern files are accepted; pattern files get the value
/// 1 for every nonzero. Symmetric and skew-symmetric files are expanded to
/// both triangles, skew-symmetric ones with the mirrored entries negated.
pub fn read_matrix_market_as_matrix(
    file_path: &Path,
    procs: usize,
    scheme: &DistributionScheme,
) -> Result<DistributedMatrix, IoError> {
    let expanded = expand_matrix_market(BufReader::new(File::open(file_path)?))?;

    // read the expanded file as a TriMat with values.
    let tri_matrix = read_matrix_market_from_bufread::<f64, usize, _>(&mut expanded.as_bytes())?;

    let triplets = tri_matrix
        .triplet_iter()
        .map(|(&value, (row, col))| Triplet::new(row, col, value));
    let matrix = DistributedMatrix::from_triplets(tri_matrix.rows(), tri_matrix.cols(), procs, triplets, scheme)
        .map_err(|e| IoError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    debug!(
        rows = matrix.rows(),
        cols = matrix.cols(),
        nonzeros = matrix.nonzeros(),
        procs,
        "read matrix market file"
    );
    Ok(matrix)
}

/// Write the distribution of `matrix` as a spy file: a matrix market style
/// header, the dimensions, then one `row col processor` line per nonzero,
/// 0-based.
pub fn write_spy<W: Write>(matrix: &DistributedMatrix, title: &str, writer: &mut W) -> io::Result<()> {
    let invalid = |e: crate::algorithms::Error| io::Error::new(io::ErrorKind::InvalidInput, e);
    let imbalance = matrix.load_imbalance().map_err(invalid)?;
    let volume = matrix.communication_volume().map_err(invalid)?;

    writeln!(writer, "%%MatrixMarket matrix coordinate integer general")?;
    writeln!(writer, "% Title: {title}")?;
    writeln!(writer, "% Processors: {}", matrix.procs())?;
    writeln!(writer, "% Load imbalance: {imbalance}")?;
    writeln!(writer, "% Communication volume: {volume}")?;
    writeln!(writer, "{} {} {}", matrix.rows(), matrix.cols(), matrix.nonzeros())?;
    for (proc, triplet) in matrix.owned_triplets() {
        writeln!(writer, "{} {} {}", triplet.row, triplet.col, proc)?;
    }

    Ok(())
}

/// Write a spy file to `file_path`.
pub fn write_spy_to_file(matrix: &DistributedMatrix, title: &str, file_path: &Path) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(file_path)?);
    write_spy(matrix, title, &mut writer)?;
    writer.flush()
}

fn bad_data(line: usize, message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("line {line}: {message}"))
}

fn parse_numbers(line_number: usize, line: &str) -> io::Result<[usize; 3]> {
    let mut fields = line.split_whitespace().map(|field| {
        field
            .parse::<usize>()
            .map_err(|_| bad_data(line_number, "expected three non-negative integers"))
    });
    let mut next = || fields.next().unwrap_or_else(|| Err(bad_data(line_number, "missing field")));
    Ok([next()?, next()?, next()?])
}

/// Rebuild a distributed matrix from a spy file. Every nonzero gets the
/// value 1. Processor ids must stay below the `% Processors:` count, or
/// below the number of nonzeros when the file declares none.
pub fn read_spy<R: BufRead>(reader: R) -> io::Result<DistributedMatrix> {
    let mut declared_procs: Option<usize> = None;
    let mut header: Option<[usize; 3]> = None;
    let mut entries: Vec<(usize, usize, usize, usize)> = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_number = index + 1;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }
        if let Some(comment) = trimmed.strip_prefix('%') {
            if let Some(procs) = comment.trim().strip_prefix("Processors:") {
                let procs = procs
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| bad_data(line_number, "bad processor count"))?;
                declared_procs = Some(procs);
            }
            continue;
        }

        let [a, b, c] = parse_numbers(line_number, trimmed)?;
        match header {
            None => header = Some([a, b, c]),
            Some([rows, cols, _]) => {
                if a >= rows || b >= cols {
                    return Err(bad_data(line_number, "nonzero outside of the matrix"));
                }
                entries.push((a, b, c, line_number));
            }
        }
    }

    let [rows, cols, nonzeros] = header.ok_or_else(|| bad_data(0, "missing dimension line"))?;
    if entries.len() != nonzeros {
        warn!(declared = nonzeros, found = entries.len(), "spy file nonzero count mismatch");
    }

    if declared_procs == Some(0) {
        return Err(bad_data(0, "zero processors declared"));
    }
    // Undeclared counts are capped at one processor per nonzero.
    let limit = declared_procs.unwrap_or_else(|| entries.len().max(1));
    if let Some(&(_, _, _, line_number)) = entries.iter().find(|&&(_, _, proc, _)| proc >= limit) {
        return Err(bad_data(line_number, "processor id out of range"));
    }
    let procs = declared_procs.unwrap_or_else(|| entries.iter().map(|&(_, _, proc, _)| proc + 1).max().unwrap_or(1));

    let mut matrix = DistributedMatrix::new(rows, cols, procs);
    for (row, col, proc, _) in entries {
        matrix.push_triplet(proc, Triplet::new(row, col, 1.0));
    }

    Ok(matrix)
}
