//! Stack naming.
//!
//! Names are part of the persisted contract: stacks created by an earlier
//! release must still be found under the same name.

/// `<prefix>-<id>`, used for both instance and binding stacks.
pub fn stack_name(prefix: &str, id: &str) -> String {
    format!("{prefix}-{id}")
}
