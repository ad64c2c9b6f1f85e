use crate::inner::InnerPage;
use crate::leaf::LeafPage;
use crate::{BTreePageKind, page_kind};
use common::{DbError, PageId, RecordId};

const PAGE: usize = 512;

fn key(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

fn rid(page: u64, slot: u16) -> RecordId {
    RecordId {
        page_id: PageId(page),
        slot,
    }
}

/// Builds an inner page with pointers 10..=10+n and keys "k0", "k1", …
fn build_inner(data: &mut [u8], n_keys: u16) -> InnerPage<'_> {
    let mut page = InnerPage::init(data);
    page.set_first_pointer(10).unwrap();
    for i in 0..n_keys {
        page.append_entry(&key(&format!("k{i}")), 11 + i).unwrap();
    }
    page
}

#[test]
fn page_type_byte_distinguishes_kinds() {
    let mut inner_data = vec![0u8; PAGE];
    InnerPage::init(&mut inner_data);
    assert_eq!(page_kind(&inner_data).unwrap(), BTreePageKind::Inner);

    let mut leaf_data = vec![0u8; PAGE];
    LeafPage::init(&mut leaf_data);
    assert_eq!(page_kind(&leaf_data).unwrap(), BTreePageKind::Leaf);

    let bogus = vec![9u8; PAGE];
    assert!(matches!(page_kind(&bogus), Err(DbError::Corruption(_))));
    assert!(LeafPage::wrap(&mut inner_data).is_err());
}

#[test]
fn inner_page_stores_alternating_pointers_and_keys() {
    let mut data = vec![0u8; PAGE];
    let page = build_inner(&mut data, 3);

    assert_eq!(page.pointer_count(), 4);
    assert_eq!(page.key_count(), 3);
    assert_eq!(page.pointer(0).unwrap(), 10);
    assert_eq!(page.pointer(3).unwrap(), 13);
    assert_eq!(page.key(1).unwrap(), b"k1");
    assert!(page.pointer(4).is_err());
}

#[test]
fn inner_move_first_returns_key_outside_moved_range() {
    let mut data = vec![0u8; PAGE];
    let mut page = build_inner(&mut data, 4); // ptrs 10..=14, keys k0..k3
    let mut sib_data = vec![0u8; PAGE];
    let mut sibling = InnerPage::init(&mut sib_data);

    // Move ptrs {10, 11} (and k0 between them); k1 is promoted.
    let sep = page.move_first_to(&mut sibling, 2, None).unwrap();
    assert_eq!(sep, b"k1");

    assert_eq!(sibling.pointer_count(), 2);
    assert_eq!(sibling.pointer(0).unwrap(), 10);
    assert_eq!(sibling.key(0).unwrap(), b"k0");

    assert_eq!(page.pointer_count(), 3);
    assert_eq!(page.pointer(0).unwrap(), 12);
    assert_eq!(page.key(0).unwrap(), b"k2");
}

#[test]
fn inner_move_first_into_nonempty_sibling_needs_parent_key() {
    let mut data = vec![0u8; PAGE];
    let mut page = build_inner(&mut data, 3);
    let mut sib_data = vec![0u8; PAGE];
    let mut sibling = InnerPage::init(&mut sib_data);
    sibling.set_first_pointer(5).unwrap();

    assert!(matches!(
        page.move_first_to(&mut sibling, 1, None),
        Err(DbError::InvalidArgument(_))
    ));

    let sep = page.move_first_to(&mut sibling, 1, Some(b"glue")).unwrap();
    assert_eq!(sep, b"k0");
    // sibling: [5] glue [10]
    assert_eq!(sibling.pointer_count(), 2);
    assert_eq!(sibling.key(0).unwrap(), b"glue");
    assert_eq!(sibling.pointer(1).unwrap(), 10);
}

#[test]
fn inner_move_last_prepends_into_sibling() {
    let mut data = vec![0u8; PAGE];
    let mut page = build_inner(&mut data, 4); // ptrs 10..=14, keys k0..k3
    let mut sib_data = vec![0u8; PAGE];
    let mut sibling = InnerPage::init(&mut sib_data);
    sibling.set_first_pointer(90).unwrap();
    sibling.append_entry(&key("z0"), 91).unwrap();

    // Move ptrs {13, 14} (k3 between them); k2 is promoted.
    let sep = page.move_last_to(&mut sibling, 2, Some(b"glue")).unwrap();
    assert_eq!(sep, b"k2");

    // sibling: [13] k3 [14] glue [90] z0 [91]
    assert_eq!(sibling.pointer_count(), 4);
    assert_eq!(sibling.pointer(0).unwrap(), 13);
    assert_eq!(sibling.key(0).unwrap(), b"k3");
    assert_eq!(sibling.key(1).unwrap(), b"glue");
    assert_eq!(sibling.pointer(2).unwrap(), 90);
    assert_eq!(sibling.key(2).unwrap(), b"z0");
    assert_eq!(sibling.pointer(3).unwrap(), 91);

    assert_eq!(page.pointer_count(), 3);
    assert_eq!(page.key_count(), 2);
    assert_eq!(page.pointer(2).unwrap(), 12);
}

#[test]
fn inner_move_to_empty_sibling_grows_tree_height() {
    // When the root splits, everything moves into a fresh sibling with no
    // parent key to glue.
    let mut data = vec![0u8; PAGE];
    let mut page = build_inner(&mut data, 2);
    let mut sib_data = vec![0u8; PAGE];
    let mut sibling = InnerPage::init(&mut sib_data);

    let sep = page.move_last_to(&mut sibling, 1, None).unwrap();
    assert_eq!(sep, b"k1");
    assert_eq!(sibling.pointer_count(), 1);
    assert_eq!(sibling.pointer(0).unwrap(), 12);
}

#[test]
fn inner_page_rejects_overflow() {
    let mut data = vec![0u8; 32];
    let mut page = InnerPage::init(&mut data);
    page.set_first_pointer(1).unwrap();
    let big = vec![b'x'; 64];
    assert!(matches!(
        page.append_entry(&big, 2),
        Err(DbError::Execution(_))
    ));
}

#[test]
fn leaf_inserts_keep_positions() {
    let mut data = vec![0u8; PAGE];
    let mut page = LeafPage::init(&mut data);
    page.insert_entry(0, &key("bbb"), rid(1, 0)).unwrap();
    page.insert_entry(1, &key("ddd"), rid(1, 1)).unwrap();
    page.insert_entry(1, &key("ccc"), rid(2, 5)).unwrap();
    page.insert_entry(0, &key("aaa"), rid(3, 7)).unwrap();

    assert_eq!(page.entry_count(), 4);
    let keys: Vec<Vec<u8>> = (0..4).map(|i| page.key(i).unwrap().to_vec()).collect();
    assert_eq!(keys, vec![key("aaa"), key("bbb"), key("ccc"), key("ddd")]);
    assert_eq!(page.record_id(2).unwrap(), rid(2, 5));
}

#[test]
fn leaf_remove_shifts_entries_down() {
    let mut data = vec![0u8; PAGE];
    let mut page = LeafPage::init(&mut data);
    for (i, k) in ["a", "b", "c"].iter().enumerate() {
        page.insert_entry(i as u16, &key(k), rid(1, i as u16)).unwrap();
    }
    let free_before = page.free_space();
    page.remove_entry(1).unwrap();
    assert_eq!(page.entry_count(), 2);
    assert_eq!(page.key(1).unwrap(), b"c");
    assert_eq!(page.record_id(1).unwrap(), rid(1, 2));
    assert!(page.free_space() > free_before);
}

#[test]
fn leaf_split_separators_bound_the_moved_range() {
    let mut data = vec![0u8; PAGE];
    let mut page = LeafPage::init(&mut data);
    for (i, k) in ["a", "b", "c", "d"].iter().enumerate() {
        page.insert_entry(i as u16, &key(k), rid(1, i as u16)).unwrap();
    }

    let mut left_data = vec![0u8; PAGE];
    let mut left = LeafPage::init(&mut left_data);
    let sep = page.move_first_to(&mut left, 2).unwrap();
    assert_eq!(sep, b"c", "separator is the first key left behind");
    assert_eq!(left.entry_count(), 2);
    assert_eq!(left.key(0).unwrap(), b"a");
    assert_eq!(page.key(0).unwrap(), b"c");

    let mut right_data = vec![0u8; PAGE];
    let mut right = LeafPage::init(&mut right_data);
    let sep = page.move_last_to(&mut right, 1).unwrap();
    assert_eq!(sep, b"d", "separator is the first key moved right");
    assert_eq!(page.entry_count(), 1);
    assert_eq!(right.entry_count(), 1);
    assert_eq!(right.record_id(0).unwrap(), rid(1, 3));
}

#[test]
fn leaf_page_rejects_overflow() {
    let mut data = vec![0u8; 32];
    let mut page = LeafPage::init(&mut data);
    page.insert_entry(0, &[b'x'; 10], rid(1, 0)).unwrap();
    assert!(matches!(
        page.insert_entry(1, &[b'y'; 10], rid(1, 1)),
        Err(DbError::Execution(_))
    ));
}
