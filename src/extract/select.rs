use std::collections::BTreeSet;

use crate::models::ImportStatement;

/// Statements that bind at least one used name, in source order.
///
/// Each statement is considered once, so a statement binding several used names
/// is still emitted once; textually identical statements on different lines are
/// distinct statements and are kept independently.
pub fn select_imports<'a>(
    imports: &'a [ImportStatement],
    used: &BTreeSet<String>,
) -> Vec<&'a ImportStatement> {
    imports
        .iter()
        .filter(|stmt| stmt.bound_names().any(|name| used.contains(name)))
        .collect()
}
