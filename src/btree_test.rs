use super::*;
use crate::store::MemStore;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

fn frag() -> FragStore<MemStore> {
    // Ignore the error: multiple tests in this binary race to install the
    // logger, and only the first one wins.
    let _ = env_logger::try_init();
    FragStore::new(MemStore::new())
}

/// Recursively walks a persisted tree from `root`, asserting the two
/// structural invariants spec.md §8 names for the B-tree: every non-root
/// node's entry count falls in `[b, 2b-1]`, and an index node's children
/// are in strictly ascending order by derived last-key. Mirrors
/// `llrb::black_height`'s role for the red-black tree.
fn check_btree_invariants<K, V>(frag_store: &FragStore<MemStore>, root: Fid)
where
    K: Ord + Clone + std::fmt::Debug + FromCbor,
    V: Clone + FromCbor,
{
    check_node_invariants::<K, V>(frag_store, root, true);
}

fn check_node_invariants<K, V>(frag_store: &FragStore<MemStore>, fid: Fid, is_root: bool)
where
    K: Ord + Clone + std::fmt::Debug + FromCbor,
    V: Clone + FromCbor,
{
    let node: BNode<K, V> = resolve_one(frag_store, &Link::Ref(fid)).unwrap();
    match node {
        BNode::Data(dn) => {
            let b = dn.cfg.data_b;
            if !is_root {
                assert!(
                    dn.entries.len() >= b,
                    "data node underflow: {} entries < b={}",
                    dn.entries.len(),
                    b
                );
            }
            assert!(
                dn.entries.len() <= 2 * b - 1,
                "data node overflow: {} entries > 2b-1={}",
                dn.entries.len(),
                2 * b - 1
            );
        }
        BNode::Index(inode) => {
            let b = inode.cfg.index_b;
            if !is_root {
                assert!(
                    inode.children.len() >= b,
                    "index node underflow: {} children < b={}",
                    inode.children.len(),
                    b
                );
            }
            assert!(
                inode.children.len() <= 2 * b - 1,
                "index node overflow: {} children > 2b-1={}",
                inode.children.len(),
                2 * b - 1
            );

            let mut prev_last_key: Option<K> = None;
            for child in &inode.children {
                let child_fid = *child
                    .as_fid()
                    .expect("a persisted index node's children are always refs");
                let child_node: BNode<K, V> = resolve_one(frag_store, child).unwrap();
                let lk = last_key(frag_store, &child_node).unwrap();
                if let Some(prev) = &prev_last_key {
                    assert!(
                        prev < &lk,
                        "index node last-keys not strictly ascending: {:?} >= {:?}",
                        prev,
                        lk
                    );
                }
                prev_last_key = Some(lk);
                check_node_invariants::<K, V>(frag_store, child_fid, false);
            }
        }
    }
}

#[test]
fn test_empty_tree_lookup() {
    let frag_store = frag();
    let root = new::<_, _, i64, i64>(&frag_store, Config::new(3, 3)).unwrap();
    assert_eq!(lookup(&frag_store, root, &42).unwrap(), None);
}

#[test]
fn test_two_leaf_btree_given_example() {
    // data1 = {1..5}, data2 = {6..10}, root = IndexNode([ref(data1), ref(data2)], [], cfg(3,3,2))
    let frag_store = frag();
    let cfg = {
        let mut c = Config::new(3, 3);
        c.set_op_buf_size(2);
        c
    };

    let data1 = DataNode {
        cfg,
        entries: (1i64..=5).map(|i| (i, i)).collect(),
    };
    let data2 = DataNode {
        cfg,
        entries: (6i64..=10).map(|i| (i, i)).collect(),
    };
    let ref1 = persist(&frag_store, Link::inlined(BNode::Data(data1))).unwrap();
    let ref2 = persist(&frag_store, Link::inlined(BNode::Data(data2))).unwrap();

    let root_node = BNode::<i64, i64>::Index(IndexNode {
        cfg,
        children: vec![Link::Ref(ref1), Link::Ref(ref2)],
        op_buf: Vec::new(),
    });
    let root = persist(&frag_store, Link::inlined(root_node)).unwrap();

    for i in 1i64..=10 {
        assert_eq!(lookup(&frag_store, root, &i).unwrap(), Some(i));
    }
    assert_eq!(lookup(&frag_store, root, &-10).unwrap(), None);
    assert_eq!(lookup(&frag_store, root, &100).unwrap(), None);
}

#[test]
fn test_forward_iteration_given_example() {
    let frag_store = frag();
    let cfg = Config::new(3, 3);

    let data1 = DataNode {
        cfg,
        entries: (1i64..=5).map(|i| (i, i)).collect(),
    };
    let data2 = DataNode {
        cfg,
        entries: (6i64..=10).map(|i| (i, i)).collect(),
    };
    let ref1 = persist(&frag_store, Link::inlined(BNode::Data(data1))).unwrap();
    let ref2 = persist(&frag_store, Link::inlined(BNode::Data(data2))).unwrap();
    let root_node = BNode::<i64, i64>::Index(IndexNode {
        cfg,
        children: vec![Link::Ref(ref1), Link::Ref(ref2)],
        op_buf: Vec::new(),
    });
    let root = persist(&frag_store, Link::inlined(root_node)).unwrap();

    let got: Vec<i64> = forward(&frag_store, root, &4)
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(got, vec![4, 5, 6, 7, 8, 9, 10]);

    let got: Vec<i64> = forward(&frag_store, root, &0)
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(got, (1..=10).collect::<Vec<_>>());
}

#[test]
fn test_insert_and_lookup_small() {
    let frag_store = frag();
    let mut root = new::<_, _, i64, i64>(&frag_store, Config::new(3, 3)).unwrap();
    for i in 0i64..20 {
        root = insert(&frag_store, root, i, i * 10).unwrap();
    }
    for i in 0i64..20 {
        assert_eq!(lookup(&frag_store, root, &i).unwrap(), Some(i * 10));
    }
    assert_eq!(lookup(&frag_store, root, &99).unwrap(), None);
}

#[test]
fn test_insert_overwrite() {
    let frag_store = frag();
    let mut root = new::<_, _, i64, i64>(&frag_store, Config::new(3, 3)).unwrap();
    root = insert(&frag_store, root, 1, 100).unwrap();
    root = insert(&frag_store, root, 1, 200).unwrap();
    assert_eq!(lookup(&frag_store, root, &1).unwrap(), Some(200));
}

#[test]
fn test_insert_then_delete_round_trip() {
    let frag_store = frag();
    let mut root = new::<_, _, i64, i64>(&frag_store, Config::new(3, 3)).unwrap();
    for i in 0i64..50 {
        root = insert(&frag_store, root, i, i).unwrap();
    }
    root = delete(&frag_store, root, &25).unwrap();
    assert_eq!(lookup(&frag_store, root, &25).unwrap(), None);
    for i in 0i64..50 {
        if i != 25 {
            assert_eq!(lookup(&frag_store, root, &i).unwrap(), Some(i));
        }
    }
}

#[test]
fn test_delete_root_collapse() {
    let frag_store = frag();
    let mut root = new::<_, _, i64, i64>(&frag_store, Config::new(3, 3)).unwrap();
    for i in 0i64..30 {
        root = insert(&frag_store, root, i, i).unwrap();
    }
    for i in 0i64..26 {
        root = delete(&frag_store, root, &i).unwrap();
    }
    let node = resolve_one(&frag_store, &Link::Ref(root)).unwrap();
    assert!(matches!(node, BNode::Data(_)), "root should have collapsed to a data node");
    for i in 26i64..30 {
        assert_eq!(lookup(&frag_store, root, &i).unwrap(), Some(i));
    }
}

#[test]
fn test_bulk_insert_lookup_and_forward() {
    let frag_store = frag();
    let mut cfg = Config::new(500, 500);
    cfg.set_op_buf_size(5);
    let mut root = new::<_, _, i64, i64>(&frag_store, cfg).unwrap();
    for i in 0i64..50_000 {
        root = insert(&frag_store, root, i, i).unwrap();
    }
    for i in [0i64, 1, 25_000, 49_999] {
        assert_eq!(lookup(&frag_store, root, &i).unwrap(), Some(i));
    }
    assert_eq!(lookup(&frag_store, root, &50_000).unwrap(), None);

    let head: Vec<i64> = forward(&frag_store, root, &450)
        .unwrap()
        .take(5)
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(head, vec![450, 451, 452, 453, 454]);

    check_btree_invariants::<i64, i64>(&frag_store, root);
}

#[test]
fn test_bulk_insert_shuffled_then_delete_half() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut keys: Vec<i64> = (0..2_000).collect();
    keys.shuffle(&mut rng);

    let frag_store = frag();
    let mut root = new::<_, _, i64, i64>(&frag_store, Config::new(8, 8)).unwrap();
    for &k in &keys {
        root = insert(&frag_store, root, k, k).unwrap();
    }
    for &k in keys.iter().filter(|k| **k % 2 == 0) {
        root = delete(&frag_store, root, &k).unwrap();
    }
    for k in 0i64..2_000 {
        let expected = if k % 2 == 0 { None } else { Some(k) };
        assert_eq!(lookup(&frag_store, root, &k).unwrap(), expected);
    }

    check_btree_invariants::<i64, i64>(&frag_store, root);
}
