//! CSV export of the measurement history.

use std::path::Path;

use eyre::WrapErr;

/// Write `history` column-wise: one header row of signal names, then one
/// row per sample, oldest first. Returns the number of data rows.
pub fn write_history(path: &Path, history: &[(String, Vec<f64>)]) -> eyre::Result<usize> {
    let rows = history.iter().map(|(_, v)| v.len()).min().unwrap_or(0);
    let mut w = csv::Writer::from_path(path)
        .wrap_err_with(|| format!("create {}", path.display()))?;
    w.write_record(history.iter().map(|(name, _)| name.as_str()))?;
    for i in 0..rows {
        w.write_record(history.iter().map(|(_, v)| v[i].to_string()))?;
    }
    w.flush().wrap_err_with(|| format!("write {}", path.display()))?;
    tracing::info!(path = %path.display(), rows, "history exported");
    Ok(rows)
}
