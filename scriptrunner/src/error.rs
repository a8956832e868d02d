//! Shared error helpers.

use std::error::Error;

/// Message of the deepest error in a `source()` chain.
///
/// Terminal run causes are reported from the innermost error, however many
/// wrapper layers it passed through on the way up.
pub fn root_cause_message(err: &(dyn Error + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}
