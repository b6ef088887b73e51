//! Directory-scanning logic that derives the set of live slab ids from
//! filenames and picks head/tail. Pure functions over the storage
//! directory — no state of its own.

use std::fs;
use std::path::Path;

use regex::Regex;

use crate::error::QueueError;

/// Builds the `^<name>-(\d+)\.index$` matcher for a given queue name.
///
/// `name` is escaped so a queue named e.g. `"a.b"` doesn't let `.` match any
/// character in the generated pattern.
fn index_file_pattern(name: &str) -> Regex {
    let pattern = format!(r"^{}-(\d+)\.index$", regex::escape(name));
    // The pattern is built from a fixed template plus an escaped literal, so
    // compilation can never fail; a malformed `name` would already have been
    // rejected by configuration validation.
    Regex::new(&pattern).expect("slab index pattern is always valid")
}

/// Scans `dir` for `<name>-<digits>.index` files and returns their slab ids,
/// sorted ascending. `.data` files are ignored; only `.index` contributes.
pub(crate) fn all_slab_ids(dir: &Path, name: &str) -> Result<Vec<u32>, QueueError> {
    let pattern = index_file_pattern(name);
    let mut ids = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if let Some(caps) = pattern.captures(&file_name) {
            if let Ok(id) = caps[1].parse::<u32>() {
                ids.push(id);
            }
        }
    }

    ids.sort_unstable();
    Ok(ids)
}

/// Minimum live slab id, or `None` if the directory has no slabs yet.
///
/// An empty directory is treated by the engine as "create slab 1" rather
/// than propagating a sentinel value, which `Option` makes impossible to
/// mishandle.
pub(crate) fn head_slab_id(ids: &[u32]) -> Option<u32> {
    ids.iter().copied().min()
}

/// Maximum live slab id, or `0` if the directory has no slabs yet.
pub(crate) fn tail_slab_id(ids: &[u32]) -> u32 {
    ids.iter().copied().max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn regex_matches_valid_names() {
        let pattern = index_file_pattern("simple");
        assert!(pattern.is_match("simple-1.index"));
        assert!(pattern.is_match("simple-01.index"));
        assert!(pattern.is_match("simple-32131231.index"));
    }

    #[test]
    fn regex_rejects_invalid_names() {
        let pattern = index_file_pattern("simple");
        assert!(!pattern.is_match("simple-01.data"));
        assert!(!pattern.is_match("simple--1.data"));
        assert!(!pattern.is_match("notsimple-32131231.index"));
        assert!(!pattern.is_match("simple-dsas.index"));
        assert!(!pattern.is_match("simple-.index"));
    }

    #[test]
    fn discovers_ids_ignoring_data_files() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "q-1.index");
        touch(dir.path(), "q-1.data");
        touch(dir.path(), "q-3.index");
        touch(dir.path(), "q-2.data"); // no matching .index, must be ignored
        touch(dir.path(), "other-9.index"); // different queue name

        let ids = all_slab_ids(dir.path(), "q").unwrap();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(head_slab_id(&ids), Some(1));
        assert_eq!(tail_slab_id(&ids), 3);
    }

    #[test]
    fn empty_directory_has_no_head_and_zero_tail() {
        let dir = tempdir().unwrap();
        let ids = all_slab_ids(dir.path(), "q").unwrap();
        assert!(ids.is_empty());
        assert_eq!(head_slab_id(&ids), None);
        assert_eq!(tail_slab_id(&ids), 0);
    }

    #[test]
    fn comparison_is_numeric_not_lexicographic() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "q-2.index");
        touch(dir.path(), "q-10.index");
        touch(dir.path(), "q-1.index");

        let ids = all_slab_ids(dir.path(), "q").unwrap();
        assert_eq!(ids, vec![1, 2, 10]);
    }
}
