// src/index.rs

use crate::models::{CanonicalFile, IdentityKey, OwningPurchase, Placement, PurchaseRecord};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Builds the deduplicated set of canonical files from a purchase catalog.
///
/// Every identity key yields exactly one [`CanonicalFile`], owned by the oldest
/// purchase that contains it. With a purchase limit, only the newest `limit`
/// purchases contribute new files; keys already present in older purchases are
/// recognised as owned and left alone. Special-collection entries are matched
/// against every purchase and do not count towards the limit.
#[derive(Debug, Clone, Copy)]
pub struct FileIndex {
    purchase_limit: usize,
    special_collection: bool,
}

impl FileIndex {
    pub fn new(purchase_limit: usize, special_collection: bool) -> Self {
        Self {
            purchase_limit,
            special_collection,
        }
    }

    pub fn build(&self, records: &[PurchaseRecord]) -> Vec<CanonicalFile> {
        let sorted = sort_oldest_first(records);
        // the special collection is not a purchase and never takes a window slot
        let purchases: Vec<&PurchaseRecord> = sorted
            .iter()
            .copied()
            .filter(|record| record.files.iter().any(|e| !e.is_trove_flag))
            .collect();
        let split = match self.purchase_limit {
            0 => 0,
            limit => purchases.len().saturating_sub(limit),
        };
        let (older, window) = purchases.split_at(split);

        let mut files: Vec<CanonicalFile> = Vec::new();
        let mut by_key: HashMap<IdentityKey, usize> = HashMap::new();

        let owned_outside: HashSet<IdentityKey> = older
            .iter()
            .flat_map(|record| record.files.iter())
            .filter(|entry| !entry.is_trove_flag)
            .map(|entry| entry.identity_key())
            .collect();

        for record in window {
            for entry in record.files.iter().filter(|e| !e.is_trove_flag) {
                let key = entry.identity_key();
                if owned_outside.contains(&key) {
                    debug!(file = %entry.file_name, purchase = %record.bundle_name, "owned by a purchase outside the window");
                    continue;
                }
                if let Some(&idx) = by_key.get(&key) {
                    let owner = &files[idx];
                    if owner.size_bytes != entry.size_bytes {
                        warn!(
                            file = %entry.file_name,
                            expected = owner.size_bytes,
                            reported = entry.size_bytes,
                            "duplicate entry reports a different size, keeping the oldest"
                        );
                    }
                    continue;
                }
                by_key.insert(key, files.len());
                files.push(CanonicalFile::from_entry(
                    entry,
                    OwningPurchase::from(*record),
                    Placement::Purchase,
                ));
            }
        }

        if !self.special_collection {
            return files;
        }

        let mut special: HashSet<IdentityKey> = HashSet::new();
        for record in &sorted {
            for entry in record.files.iter().filter(|e| e.is_trove_flag) {
                let key = entry.identity_key();
                if by_key.contains_key(&key) || owned_outside.contains(&key) {
                    debug!(file = %entry.file_name, "special collection entry merged into a purchase");
                    continue;
                }
                if !special.insert(key) {
                    continue;
                }
                files.push(CanonicalFile::from_entry(
                    entry,
                    OwningPurchase::from(*record),
                    Placement::SpecialCollection,
                ));
            }
        }

        files
    }
}

/// Every identity key present anywhere in the catalog.
pub fn catalog_keys(records: &[PurchaseRecord]) -> HashSet<IdentityKey> {
    records
        .iter()
        .flat_map(|record| record.files.iter())
        .map(|entry| entry.identity_key())
        .collect()
}

fn sort_oldest_first(records: &[PurchaseRecord]) -> Vec<&PurchaseRecord> {
    let mut sorted: Vec<&PurchaseRecord> = records.iter().collect();
    sorted.sort_by(|a, b| {
        a.purchased_at
            .cmp(&b.purchased_at)
            .then_with(|| a.purchase_id.cmp(&b.purchase_id))
    });
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Checksum, FileEntry, Platform};
    use chrono::NaiveDate;

    fn record(id: &str, date: (i32, u32, u32), bundle: &str, files: Vec<FileEntry>) -> PurchaseRecord {
        PurchaseRecord {
            purchase_id: id.into(),
            purchased_at: NaiveDate::from_ymd_opt(date.0, date.1, date.2)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            bundle_name: bundle.into(),
            files,
        }
    }

    fn file(name: &str, md5: Option<&str>, size: u64) -> FileEntry {
        FileEntry {
            platform: Platform::Ebook,
            item_name: name.into(),
            file_name: format!("{name}.pdf"),
            url: format!("https://dl.example.invalid/{name}.pdf"),
            size_bytes: size,
            checksum: md5.map(Checksum::md5),
            is_trove_flag: false,
        }
    }

    fn trove(name: &str, md5: &str) -> FileEntry {
        FileEntry {
            is_trove_flag: true,
            ..file(name, Some(md5), 10)
        }
    }

    #[test]
    fn oldest_purchase_owns_duplicates() {
        let records = vec![
            record("p3", (2021, 1, 1), "Bundle C", vec![file("f", Some("abc"), 100)]),
            record("p1", (2020, 1, 1), "Bundle A", vec![file("f", Some("abc"), 100)]),
            record("p2", (2020, 6, 1), "Bundle B", vec![file("f", Some("abc"), 100)]),
        ];
        let files = FileIndex::new(0, false).build(&records);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].owner.purchase_id, "p1");
        assert_eq!(files[0].owner.bundle_name, "Bundle A");
    }

    #[test]
    fn identity_keys_are_unique() {
        let records = vec![
            record(
                "p1",
                (2020, 1, 1),
                "A",
                vec![
                    file("a", Some("1"), 1),
                    file("b", None, 2),
                    file("b", None, 2),
                    file("c", None, 3),
                ],
            ),
            record(
                "p2",
                (2020, 2, 1),
                "B",
                vec![file("a", Some("1"), 1), file("b", None, 2), file("d", Some("4"), 4)],
            ),
        ];
        let files = FileIndex::new(0, false).build(&records);
        let keys: HashSet<_> = files.iter().map(|f| f.identity_key.clone()).collect();
        assert_eq!(keys.len(), files.len());
        assert_eq!(files.len(), 4);
    }

    #[test]
    fn checksumless_entries_fall_back_to_name_and_size() {
        let records = vec![record(
            "p1",
            (2020, 1, 1),
            "A",
            vec![file("x", None, 5), file("x", None, 6)],
        )];
        let files = FileIndex::new(0, false).build(&records);
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn purchase_limit_only_scans_newest_purchases() {
        let records = vec![
            record("p1", (2020, 1, 1), "A", vec![file("old", Some("o"), 1)]),
            record("p2", (2020, 2, 1), "B", vec![file("mid", Some("m"), 1)]),
            record(
                "p3",
                (2020, 3, 1),
                "C",
                vec![file("old", Some("o"), 1), file("new", Some("n"), 1)],
            ),
        ];
        let files = FileIndex::new(1, false).build(&records);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].item_name, "new");
        assert_eq!(files[0].owner.purchase_id, "p3");
    }

    #[test]
    fn purchase_limit_larger_than_catalog_scans_everything() {
        let records = vec![
            record("p1", (2020, 1, 1), "A", vec![file("a", Some("a"), 1)]),
            record("p2", (2020, 2, 1), "B", vec![file("b", Some("b"), 1)]),
        ];
        assert_eq!(FileIndex::new(10, false).build(&records).len(), 2);
    }

    #[test]
    fn trove_entries_merge_into_purchases() {
        let records = vec![
            record("p1", (2020, 1, 1), "A", vec![file("game", Some("abc"), 10)]),
            record(
                "trove",
                (2020, 5, 1),
                "Trove",
                vec![trove("game", "abc"), trove("extra", "def")],
            ),
        ];
        let files = FileIndex::new(0, true).build(&records);
        assert_eq!(files.len(), 2);
        let game = files.iter().find(|f| f.item_name == "game").unwrap();
        assert_eq!(game.placement, Placement::Purchase);
        let extra = files.iter().find(|f| f.item_name == "extra").unwrap();
        assert_eq!(extra.placement, Placement::SpecialCollection);
    }

    #[test]
    fn special_collection_does_not_take_a_window_slot() {
        let records = vec![
            record("p1", (2020, 1, 1), "A", vec![file("oldest", Some("o"), 1)]),
            record("p3", (2020, 3, 1), "C", vec![file("newest", Some("n"), 1)]),
            record(
                "trove",
                (2020, 6, 1),
                "Trove",
                vec![trove("bonus", "b"), trove("oldest", "o")],
            ),
        ];
        let files = FileIndex::new(1, true).build(&records);
        let mut names: Vec<_> = files.iter().map(|f| f.item_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["bonus", "newest"]);
    }

    #[test]
    fn special_collection_older_than_window_is_still_scanned() {
        let records = vec![
            record("trove", (2019, 1, 1), "Trove", vec![trove("bonus", "b")]),
            record("p1", (2020, 1, 1), "A", vec![file("a", Some("a"), 1)]),
            record("p2", (2020, 2, 1), "B", vec![file("b", Some("bb"), 1)]),
        ];
        let files = FileIndex::new(1, true).build(&records);
        let bonus = files.iter().find(|f| f.item_name == "bonus").unwrap();
        assert_eq!(bonus.placement, Placement::SpecialCollection);
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn trove_entries_dropped_when_disabled() {
        let records = vec![record("trove", (2020, 5, 1), "Trove", vec![trove("extra", "def")])];
        assert!(FileIndex::new(0, false).build(&records).is_empty());
    }

    #[test]
    fn catalog_keys_cover_every_entry() {
        let records = vec![record(
            "p1",
            (2020, 1, 1),
            "A",
            vec![file("a", Some("a"), 1), trove("t", "t")],
        )];
        assert_eq!(catalog_keys(&records).len(), 2);
    }
}
