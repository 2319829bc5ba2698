//! Selector state access
//!
//! Reads and restores the "currently chosen egress path" on the primary
//! selector group of an engine instance. The engine's routing graph does
//! not designate one canonical user-facing selector, so a short static
//! priority list of conventional tags is probed in order.

use tracing::debug;

use crate::engine::Engine;

/// Well-known selector-group tags, most conventional first.
const SELECTOR_TAGS: [&str; 4] = ["proxy", "select", "selector", "PROXY"];

/// The active member of the primary selector group, if the instance has one.
///
/// Returns `None` (not an error) when no well-known selector group exists.
pub fn read_selection(engine: &dyn Engine) -> Option<String> {
    for tag in SELECTOR_TAGS {
        let Some(egress) = engine.egress(tag) else {
            continue;
        };
        if let Some(group) = egress.as_selector() {
            let current = group.current();
            debug!(group = tag, selection = %current, "Read selector state");
            return Some(current);
        }
    }
    None
}

/// Apply `selection` to the first well-known selector group that accepts it.
///
/// Returns false when no selector group exists or none of them has a member
/// with that tag; a no-op, reported as "not found".
pub fn write_selection(engine: &dyn Engine, selection: &str) -> bool {
    for tag in SELECTOR_TAGS {
        let Some(egress) = engine.egress(tag) else {
            continue;
        };
        if let Some(group) = egress.as_selector() {
            if group.apply(selection) {
                debug!(group = tag, selection, "Applied selector state");
                return true;
            }
        }
    }
    false
}
