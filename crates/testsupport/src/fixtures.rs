//! Row, delta, and projection builders.

/// Projection selecting every one of `n` user columns.
pub fn all_columns(n: usize) -> Vec<bool> {
    vec![true; n]
}

/// Update deltas that leave every one of `n` columns unchanged except
/// column `i`, which becomes `value`.
pub fn set_column(n: usize, i: usize, value: i64) -> Vec<Option<i64>> {
    let mut deltas = vec![None; n];
    deltas[i] = Some(value);
    deltas
}

/// Update deltas assigning `value` to every column in `columns`.
pub fn set_columns(n: usize, columns: &[usize], value: i64) -> Vec<Option<i64>> {
    let mut deltas = vec![None; n];
    for column in columns {
        deltas[*column] = Some(value);
    }
    deltas
}
