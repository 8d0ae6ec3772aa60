//! In-memory resource directory and its mutation engine.
//!
//! Resources live in [`Group`]s: contiguous runs of entries numbered
//! `base..base + len`. Groups are kept ascending and non-overlapping, which
//! makes number lookup a range check per group, and a separate sorted name
//! index makes name lookup a binary search. Both derived structures are
//! maintained across every add/remove.

use std::cmp::Ordering;

use crate::memory::Handle;

/// External override probe state for one entry
///
/// Remembers whether the loader has already looked for a loose file with the
/// entry's name, so a missing override file is not stat'ed again on every
/// load.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Probe {
    /// The filesystem has not been checked yet
    #[default]
    Untested,
    /// A loose file was found on a previous load
    Found,
    /// The filesystem was checked and no file existed
    Missing,
}

/// Metadata for one resource
#[derive(Debug, Clone, Default)]
pub struct Entry {
    /// Byte offset of the data in the rez file, zero if never archived
    pub file_offset: u32,

    /// Size of the data once decompressed, zero until known
    pub length: u32,

    /// Size of the compressed payload in the rez file, zero if uncompressed
    pub compressed_length: u32,

    /// Filename of the resource, if it has one
    pub name: Option<Box<str>>,

    /// Handle to the cached data, if resident
    pub data: Option<Handle>,

    /// Codec slot used to pack the data, zero for none
    pub codec: u8,

    /// Load into fixed/high memory
    pub high_memory: bool,

    /// External override probe state
    pub probe: Probe,

    /// Outstanding references to the cached data (saturating)
    pub refs: u8,
}

impl Entry {
    pub(crate) fn named(name: &str) -> Entry {
        Entry {
            name: Some(name.into()),
            ..Entry::default()
        }
    }
}

/// Contiguous run of entries sharing ascending resource numbers
#[derive(Debug, Clone, Default)]
pub struct Group {
    /// Resource number of `entries[0]`
    pub base: u32,

    /// The entries, numbered `base..base + entries.len()`
    pub entries: Vec<Entry>,
}

/// One record of the sorted name index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameToRezNum {
    /// The entry's filename
    pub name: Box<str>,

    /// Resource number the name resolves to
    pub rez_num: u32,
}

/// The resource directory: groups plus the derived name index
#[derive(Debug, Default)]
pub struct Directory {
    groups: Vec<Group>,
    names: Vec<NameToRezNum>,
}

/// ASCII case-insensitive string ordering, the sort order of the name index
pub(crate) fn case_cmp(first: &str, second: &str) -> Ordering {
    let lhs = first.bytes().map(|b| b.to_ascii_lowercase());
    let rhs = second.bytes().map(|b| b.to_ascii_lowercase());
    lhs.cmp(rhs)
}

/// Strip a numeric prefix and colon from a filename, `"20:foo.txt"` -> `"foo.txt"`
pub(crate) fn strip_number_prefix(name: &str) -> &str {
    if name.as_bytes().first().is_some_and(|b| b.is_ascii_digit()) {
        if let Some(position) = name.find(':') {
            return &name[position + 1..];
        }
    }
    name
}

impl Directory {
    /// Build a directory from parsed groups and index the names
    pub fn from_groups(groups: Vec<Group>) -> Directory {
        let mut directory = Directory {
            groups,
            names: Vec::new(),
        };
        directory.process_names();
        directory
    }

    /// The resource groups, ascending by base number
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// The sorted name index
    pub fn names(&self) -> &[NameToRezNum] {
        &self.names
    }

    /// Whether the directory holds no resources
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of resources across all groups
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.entries.len()).sum()
    }

    /// Locate a resource by number
    pub fn find(&self, rez_num: u32) -> Option<&Entry> {
        let (group, offset) = self.locate(rez_num)?;
        Some(&self.groups[group].entries[offset])
    }

    /// Locate a resource by number, mutably
    pub fn find_mut(&mut self, rez_num: u32) -> Option<&mut Entry> {
        let (group, offset) = self.locate(rez_num)?;
        Some(&mut self.groups[group].entries[offset])
    }

    fn locate(&self, rez_num: u32) -> Option<(usize, usize)> {
        for (index, group) in self.groups.iter().enumerate() {
            if let Some(offset) = rez_num.checked_sub(group.base) {
                if (offset as usize) < group.entries.len() {
                    return Some((index, offset as usize));
                }
            }
        }
        None
    }

    /// Binary-search the name index case-insensitively.
    ///
    /// Strips a numeric prefix (`"20:foo.txt"` matches `"foo.txt"`) first.
    /// On a miss the returned `Err` holds the index where the name would be
    /// inserted to keep the index sorted.
    pub fn find_name(&self, name: &str) -> Result<usize, usize> {
        let name = strip_number_prefix(name);
        self.names
            .binary_search_by(|probe| case_cmp(&probe.name, name))
    }

    /// Resolve a filename to its resource number
    pub fn rez_num(&self, name: &str) -> Option<u32> {
        self.find_name(name).ok().map(|i| self.names[i].rez_num)
    }

    /// Filename of a resource, if it has one
    pub fn name_of(&self, rez_num: u32) -> Option<&str> {
        self.find(rez_num)?.name.as_deref()
    }

    /// Lowest valid resource number
    pub fn lowest(&self) -> Option<u32> {
        self.groups.first().map(|g| g.base)
    }

    /// Highest valid resource number
    pub fn highest(&self) -> Option<u32> {
        self.groups
            .last()
            .map(|g| g.base + g.entries.len() as u32 - 1)
    }

    /// Iterate every `(resource number, entry)` pair
    pub fn entries(&self) -> impl Iterator<Item = (u32, &Entry)> {
        self.groups.iter().flat_map(|group| {
            group
                .entries
                .iter()
                .enumerate()
                .map(move |(offset, entry)| (group.base + offset as u32, entry))
        })
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = (u32, &mut Entry)> {
        self.groups.iter_mut().flat_map(|group| {
            let base = group.base;
            group
                .entries
                .iter_mut()
                .enumerate()
                .map(move |(offset, entry)| (base + offset as u32, entry))
        })
    }

    /// Register a filename, returning its resource number.
    ///
    /// Idempotent: a name that already resolves returns its existing number
    /// and the directory does not grow. A new name gets a fresh number
    /// adjacent to the existing numbering: before the first group when its
    /// base leaves room, otherwise appended after it, folding the following
    /// group in when the numbering becomes contiguous. New numbers are never
    /// carved out of the middle of the number space.
    pub fn add_name(&mut self, name: &str) -> u32 {
        if let Some(rez_num) = self.rez_num(name) {
            return rez_num;
        }
        let name = strip_number_prefix(name);

        if self.groups.is_empty() {
            self.groups.push(Group {
                base: 1,
                entries: vec![Entry::named(name)],
            });
            self.process_names();
            return 1;
        }

        let first = &mut self.groups[0];
        let rez_num = if first.base >= 2 {
            first.base -= 1;
            first.entries.insert(0, Entry::named(name));
            first.base
        } else {
            let rez_num = first.base + first.entries.len() as u32;
            first.entries.push(Entry::named(name));
            rez_num
        };

        // The new tail may now touch the next group
        if self.groups.len() >= 2 && self.groups[1].base == rez_num + 1 {
            let follower = self.groups.remove(1);
            self.groups[0].entries.extend(follower.entries);
        }
        self.process_names();
        rez_num
    }

    /// Remove a resource by number. Unknown numbers are a no-op.
    ///
    /// The caller is responsible for freeing any cached data handle first.
    pub fn remove(&mut self, rez_num: u32) {
        let Some((index, offset)) = self.locate(rez_num) else {
            return;
        };

        // Last resource overall: surrender the whole structure
        if self.groups.len() == 1 && self.groups[0].entries.len() == 1 {
            self.groups.clear();
            self.names.clear();
            return;
        }

        let group = &mut self.groups[index];
        if offset == 0 {
            group.base += 1;
            group.entries.remove(0);
            if group.entries.is_empty() {
                self.groups.remove(index);
            }
        } else if offset == group.entries.len() - 1 {
            group.entries.pop();
        } else {
            // Interior removal splits the group around the gap
            let tail = group.entries.split_off(offset + 1);
            group.entries.pop();
            self.groups.insert(
                index + 1,
                Group {
                    base: rez_num + 1,
                    entries: tail,
                },
            );
        }
        self.process_names();
    }

    /// Remove a resource by name. Unknown names are a no-op.
    pub fn remove_name(&mut self, name: &str) {
        if let Some(rez_num) = self.rez_num(name) {
            self.remove(rez_num);
        }
    }

    /// Rebuild the sorted name index from the entries
    pub(crate) fn process_names(&mut self) {
        let mut names: Vec<NameToRezNum> = self
            .entries()
            .filter_map(|(rez_num, entry)| {
                entry.name.as_ref().map(|name| NameToRezNum {
                    name: name.clone(),
                    rez_num,
                })
            })
            .collect();
        names.sort_by(|a, b| case_cmp(&a.name, &b.name));
        self.names = names;
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut previous_end: Option<u32> = None;
        for group in &self.groups {
            assert!(!group.entries.is_empty(), "group {} is empty", group.base);
            if let Some(end) = previous_end {
                assert!(
                    group.base > end,
                    "group {} overlaps or touches out of order",
                    group.base
                );
            }
            previous_end = Some(group.base + group.entries.len() as u32 - 1);
        }
        let named = self.entries().filter(|(_, e)| e.name.is_some()).count();
        assert_eq!(named, self.names.len());
        for pair in self.names.windows(2) {
            assert_ne!(case_cmp(&pair[0].name, &pair[1].name), Ordering::Greater);
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{case_cmp, strip_number_prefix, Directory, Entry, Group};

    fn directory_of(groups: &[(u32, &[&str])]) -> Directory {
        let groups = groups
            .iter()
            .map(|(base, names)| Group {
                base: *base,
                entries: names.iter().map(|n| Entry::named(n)).collect(),
            })
            .collect();
        Directory::from_groups(groups)
    }

    fn shape(directory: &Directory) -> Vec<(u32, usize)> {
        directory
            .groups()
            .iter()
            .map(|g| (g.base, g.entries.len()))
            .collect()
    }

    #[test]
    fn prefix_stripping() {
        assert_eq!(strip_number_prefix("20:foo.txt"), "foo.txt");
        assert_eq!(strip_number_prefix("foo.txt"), "foo.txt");
        assert_eq!(strip_number_prefix(":foo.txt"), ":foo.txt");
        assert_eq!(strip_number_prefix("9:"), "");
    }

    #[test]
    fn case_insensitive_ordering() {
        assert_eq!(case_cmp("a.txt", "A.TXT"), std::cmp::Ordering::Equal);
        assert_eq!(case_cmp("a.txt", "B.TXT"), std::cmp::Ordering::Less);
    }

    #[test]
    fn find_by_number_across_groups() {
        let directory = directory_of(&[(1, &["a", "b"]), (10, &["c"])]);
        assert!(directory.find(1).is_some());
        assert!(directory.find(2).is_some());
        assert!(directory.find(3).is_none());
        assert!(directory.find(10).is_some());
        assert!(directory.find(11).is_none());
        assert!(directory.find(0).is_none());
        assert_eq!(directory.lowest(), Some(1));
        assert_eq!(directory.highest(), Some(10));
    }

    // The index sorts case-insensitively no matter the insertion order, and
    // lookups ignore case.
    #[test]
    fn name_index_is_sorted_case_insensitively() {
        let directory = directory_of(&[(1, &["b.txt", "a.txt", "c.txt"])]);
        let names: Vec<&str> = directory.names().iter().map(|n| &*n.name).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(directory.rez_num("a.txt"), Some(2));
        assert_eq!(directory.rez_num("B.TXT"), directory.rez_num("b.txt"));
        assert_eq!(directory.rez_num("20:b.txt"), Some(1));
        directory.check_invariants();
    }

    #[test]
    fn find_name_miss_yields_insertion_point() {
        let directory = directory_of(&[(1, &["b.txt", "d.txt"])]);
        assert_eq!(directory.find_name("a.txt"), Err(0));
        assert_eq!(directory.find_name("c.txt"), Err(1));
        assert_eq!(directory.find_name("e.txt"), Err(2));
    }

    #[test]
    fn add_name_to_empty_directory() {
        let mut directory = Directory::default();
        assert_eq!(directory.add_name("first.txt"), 1);
        assert_eq!(shape(&directory), vec![(1, 1)]);
        assert_eq!(directory.rez_num("first.txt"), Some(1));
        directory.check_invariants();
    }

    #[test]
    fn add_name_is_idempotent() {
        let mut directory = Directory::default();
        let first = directory.add_name("thing.bin");
        let len = directory.len();
        let second = directory.add_name("thing.bin");
        assert_eq!(first, second);
        assert_eq!(directory.len(), len);
    }

    #[test]
    fn add_name_prepends_when_the_first_group_has_room() {
        let mut directory = directory_of(&[(5, &["a"])]);
        assert_eq!(directory.add_name("new.txt"), 4);
        assert_eq!(shape(&directory), vec![(4, 2)]);
        directory.check_invariants();
    }

    #[test]
    fn add_name_appends_when_the_first_group_starts_at_one() {
        let mut directory = directory_of(&[(1, &["a", "b"])]);
        assert_eq!(directory.add_name("new.txt"), 3);
        assert_eq!(shape(&directory), vec![(1, 3)]);
        directory.check_invariants();
    }

    #[test]
    fn add_name_merges_adjacent_groups() {
        let mut directory = directory_of(&[(1, &["a"]), (3, &["c", "d"])]);
        assert_eq!(directory.add_name("b.txt"), 2);
        assert_eq!(shape(&directory), vec![(1, 4)]);
        assert_eq!(directory.name_of(3), Some("c"));
        directory.check_invariants();
    }

    #[test]
    fn add_then_remove_restores_the_directory() {
        let mut directory = directory_of(&[(1, &["a", "b"]), (10, &["x"])]);
        let before_shape = shape(&directory);
        let before_names: Vec<_> = directory.names().to_vec();

        let rez_num = directory.add_name("zz.txt");
        assert_ne!(shape(&directory), before_shape);
        directory.remove(rez_num);

        assert_eq!(shape(&directory), before_shape);
        assert_eq!(directory.names(), &before_names[..]);
        directory.check_invariants();
    }

    #[test]
    fn remove_first_entry_bumps_the_base() {
        let mut directory = directory_of(&[(1, &["a", "b", "c"])]);
        directory.remove(1);
        assert_eq!(shape(&directory), vec![(2, 2)]);
        assert_eq!(directory.name_of(2), Some("b"));
        directory.check_invariants();
    }

    #[test]
    fn remove_last_entry_shrinks_the_group() {
        let mut directory = directory_of(&[(1, &["a", "b", "c"])]);
        directory.remove(3);
        assert_eq!(shape(&directory), vec![(1, 2)]);
        directory.check_invariants();
    }

    #[test]
    fn remove_middle_entry_splits_then_add_remerges() {
        let mut directory = directory_of(&[(1, &["a", "b", "c"])]);
        directory.remove(2);
        assert_eq!(shape(&directory), vec![(1, 1), (3, 1)]);
        assert_eq!(directory.name_of(1), Some("a"));
        assert_eq!(directory.name_of(3), Some("c"));
        assert_eq!(directory.rez_num("b"), None);
        directory.check_invariants();

        // An add that lands in the gap re-merges the two halves
        assert_eq!(directory.add_name("b2"), 2);
        assert_eq!(shape(&directory), vec![(1, 3)]);
        directory.check_invariants();
    }

    #[test]
    fn remove_only_entry_of_a_leading_group_drops_it() {
        let mut directory = directory_of(&[(1, &["a"]), (5, &["e", "f"])]);
        directory.remove(1);
        assert_eq!(shape(&directory), vec![(5, 2)]);
        directory.check_invariants();
    }

    #[test]
    fn remove_the_last_resource_clears_everything() {
        let mut directory = directory_of(&[(7, &["only"])]);
        directory.remove(7);
        assert!(directory.is_empty());
        assert!(directory.names().is_empty());
        // and removing again is a no-op
        directory.remove(7);
    }

    #[test]
    fn remove_by_name() {
        let mut directory = directory_of(&[(1, &["a", "b"])]);
        directory.remove_name("missing");
        assert_eq!(directory.len(), 2);
        directory.remove_name("B");
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.rez_num("b"), None);
    }

    #[test]
    fn contiguity_survives_a_mutation_storm() {
        let mut directory = Directory::default();
        for name in ["a", "b", "c", "d", "e", "f"] {
            directory.add_name(name);
        }
        directory.check_invariants();
        directory.remove(3);
        directory.check_invariants();
        directory.remove(5);
        directory.check_invariants();
        directory.add_name("g");
        directory.check_invariants();
        directory.remove(1);
        directory.check_invariants();

        for group in directory.groups() {
            for (offset, _) in group.entries.iter().enumerate() {
                let rez_num = group.base + offset as u32;
                assert!(directory.find(rez_num).is_some());
            }
        }
    }
}
