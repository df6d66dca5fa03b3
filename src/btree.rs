//! Persistent B-tree over the fragment layer.
//!
//! Data nodes hold a sorted key→value mapping; index nodes hold an ordered
//! sequence of child handles with no explicitly-stored separator keys —
//! a reader derives them on demand as the last key reachable under each
//! child. Both share a [`Config`] carried inside every persisted node.

use std::collections::{BTreeMap, VecDeque};

use cbordata::{Cborize, FromCbor, IntoCbor};

use crate::{
    fid::Fid,
    fragment::{FragStore, Link},
    store::Store,
    ContentHash, Result,
};

const CONFIG_VER: u32 = 0x0001;
const BFRAG_VER: u32 = 0x0001;

/// `{index-b, data-b, op-buf-size}`, carried inside every node so a loaded
/// node carries its own invariants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Cborize)]
pub struct Config {
    pub index_b: usize,
    pub data_b: usize,
    pub op_buf_size: usize,
}

impl Config {
    const ID: u32 = CONFIG_VER;

    pub fn new(index_b: usize, data_b: usize) -> Config {
        Config {
            index_b,
            data_b,
            op_buf_size: 0,
        }
    }

    pub fn set_op_buf_size(&mut self, op_buf_size: usize) -> &mut Self {
        self.op_buf_size = op_buf_size;
        self
    }
}

/// Leaf node: a sorted key→value mapping, between `data_b` and `2*data_b-1`
/// entries (the root is exempt from the lower bound).
#[derive(Clone, Debug)]
pub struct DataNode<K, V> {
    pub cfg: Config,
    pub entries: BTreeMap<K, V>,
}

/// Internal node: an ordered sequence of child handles plus an opaque,
/// preserved-but-unpopulated operation buffer.
#[derive(Clone, Debug)]
pub struct IndexNode<K, V> {
    pub cfg: Config,
    pub children: Vec<Link<BNode<K, V>>>,
    pub op_buf: Vec<u8>,
}

/// In-memory B-tree node: either kind, with [`Link`] children so a
/// freshly-split or freshly-merged subtree may stay inlined until bubbled
/// up to a persisted parent.
#[derive(Clone, Debug)]
pub enum BNode<K, V> {
    Data(DataNode<K, V>),
    Index(IndexNode<K, V>),
}

/// Wire shape of a [`BNode`]: an index node's children are always [`Fid`]s.
#[derive(Clone, Cborize)]
pub enum BFrag<K, V> {
    Data {
        cfg: Config,
        entries: Vec<(K, V)>,
    },
    Index {
        cfg: Config,
        children: Vec<Fid>,
        op_buf: Vec<u8>,
    },
}

impl<K, V> BFrag<K, V> {
    const ID: u32 = BFRAG_VER;
}

fn to_node<K, V>(frag: BFrag<K, V>) -> BNode<K, V>
where
    K: Ord,
{
    match frag {
        BFrag::Data { cfg, entries } => BNode::Data(DataNode {
            cfg,
            entries: entries.into_iter().collect(),
        }),
        BFrag::Index {
            cfg,
            children,
            op_buf,
        } => BNode::Index(IndexNode {
            cfg,
            children: children.into_iter().map(Link::Ref).collect(),
            op_buf,
        }),
    }
}

fn resolve_one<S, H, K, V>(frag_store: &FragStore<S, H>, link: &Link<BNode<K, V>>) -> Result<BNode<K, V>>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + FromCbor,
    V: Clone + FromCbor,
{
    match link {
        Link::Inlined(node) => Ok((**node).clone()),
        Link::Ref(fid) => {
            let frag: BFrag<K, V> = frag_store.load_ref(fid)?;
            Ok(to_node(frag))
        }
    }
}

/// `create-ref`, specialized to a B-tree subtree: recursively persists any
/// still-inlined descendants bottom-up, then writes this node's own wire
/// fragment through the fragment layer.
fn persist<S, H, K, V>(frag_store: &FragStore<S, H>, link: Link<BNode<K, V>>) -> Result<Fid>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + IntoCbor + FromCbor,
    V: Clone + IntoCbor + FromCbor,
{
    match link {
        Link::Ref(fid) => Ok(fid),
        Link::Inlined(node) => {
            let frag = match *node {
                BNode::Data(dn) => BFrag::Data {
                    cfg: dn.cfg,
                    entries: dn.entries.into_iter().collect(),
                },
                BNode::Index(inode) => {
                    let children = inode
                        .children
                        .into_iter()
                        .map(|c| persist(frag_store, c))
                        .collect::<Result<Vec<_>>>()?;
                    BFrag::Index {
                        cfg: inode.cfg,
                        children,
                        op_buf: inode.op_buf,
                    }
                }
            };
            let link = frag_store.create_ref(Link::inlined(frag))?;
            Ok(*link.as_fid().expect("create_ref always returns a Ref"))
        }
    }
}

fn overflow<K, V>(node: &BNode<K, V>) -> bool {
    match node {
        BNode::Data(dn) => dn.entries.len() >= 2 * dn.cfg.data_b,
        BNode::Index(inode) => inode.children.len() >= 2 * inode.cfg.index_b,
    }
}

fn underflow<K, V>(node: &BNode<K, V>) -> bool {
    match node {
        BNode::Data(dn) => dn.entries.len() < dn.cfg.data_b,
        BNode::Index(inode) => inode.children.len() < inode.cfg.index_b,
    }
}

/// `last-key(node)`: the rightmost key reachable beneath `node`, resolving
/// down the rightmost spine of children as needed.
fn last_key<S, H, K, V>(frag_store: &FragStore<S, H>, node: &BNode<K, V>) -> Result<K>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + FromCbor,
    V: Clone + FromCbor,
{
    match node {
        BNode::Data(dn) => Ok(dn
            .entries
            .keys()
            .next_back()
            .cloned()
            .expect("data node must be nonempty to have a last-key")),
        BNode::Index(inode) => {
            let last = inode
                .children
                .last()
                .expect("index node must have at least one child");
            let child = resolve_one(frag_store, last)?;
            last_key(frag_store, &child)
        }
    }
}

/// `merge(this, sibling)`: `left` and `right` must be known to the caller
/// to already be in ascending order and of the same kind.
fn merge<K, V>(left: BNode<K, V>, right: BNode<K, V>) -> BNode<K, V>
where
    K: Ord,
{
    match (left, right) {
        (BNode::Data(mut l), BNode::Data(r)) => {
            l.entries.extend(r.entries);
            BNode::Data(l)
        }
        (BNode::Index(mut l), BNode::Index(r)) => {
            l.children.extend(r.children);
            l.op_buf.extend(r.op_buf);
            BNode::Index(l)
        }
        _ => unreachable!("merge requires siblings of the same kind"),
    }
}

/// `split(node) -> {left, right, median}`, splitting at position `b`. The
/// operation buffer of an index node is partitioned at its own midpoint:
/// the core never populates it, so any partition that preserves the
/// concatenation-on-merge property is conformant.
fn split<S, H, K, V>(frag_store: &FragStore<S, H>, node: BNode<K, V>) -> Result<(BNode<K, V>, BNode<K, V>, K)>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + FromCbor,
    V: Clone + FromCbor,
{
    match node {
        BNode::Data(dn) => {
            let b = dn.cfg.data_b;
            let mut iter = dn.entries.into_iter();
            let left_entries: BTreeMap<K, V> = (&mut iter).take(b).collect();
            let right_entries: BTreeMap<K, V> = iter.collect();
            let median = left_entries
                .keys()
                .next_back()
                .cloned()
                .expect("split requires a nonempty node");
            Ok((
                BNode::Data(DataNode {
                    cfg: dn.cfg,
                    entries: left_entries,
                }),
                BNode::Data(DataNode {
                    cfg: dn.cfg,
                    entries: right_entries,
                }),
                median,
            ))
        }
        BNode::Index(inode) => {
            let b = inode.cfg.index_b;
            let mut children = inode.children;
            let right_children = children.split_off(b);
            let left_children = children;

            let mut op_buf = inode.op_buf;
            let mid = op_buf.len() / 2;
            let right_buf = op_buf.split_off(mid);
            let left_buf = op_buf;

            let left = BNode::Index(IndexNode {
                cfg: inode.cfg,
                children: left_children,
                op_buf: left_buf,
            });
            let median = last_key(frag_store, &left)?;
            let right = BNode::Index(IndexNode {
                cfg: inode.cfg,
                children: right_children,
                op_buf: right_buf,
            });
            Ok((left, right, median))
        }
    }
}

/// `lookup(node, key) -> child-index`: binary search over the derived
/// last-keys, returning the smallest `i` with `key <= last-key(children[i])`,
/// clamped to the last child if `key` exceeds every last-key.
fn lookup_index<S, H, K, V>(frag_store: &FragStore<S, H>, inode: &IndexNode<K, V>, key: &K) -> Result<usize>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + FromCbor,
    V: Clone + FromCbor,
{
    let mut lo = 0usize;
    let mut hi = inode.children.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let node = resolve_one(frag_store, &inode.children[mid])?;
        let lk = last_key(frag_store, &node)?;
        if key <= &lk {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(if lo < inode.children.len() {
        lo
    } else {
        inode.children.len() - 1
    })
}

/// The alternating sequence `[root, i0, child0, ..., leaf]`: the chosen
/// index at every ancestor level, plus the terminal data node.
pub struct Path<K, V> {
    ancestors: Vec<(IndexNode<K, V>, usize)>,
    leaf: DataNode<K, V>,
}

/// `lookup-path(tree, key)`.
fn lookup_path<S, H, K, V>(frag_store: &FragStore<S, H>, root: Fid, key: &K) -> Result<Path<K, V>>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + FromCbor,
    V: Clone + FromCbor,
{
    let mut node = resolve_one(frag_store, &Link::Ref(root))?;
    let mut ancestors = Vec::new();
    loop {
        match node {
            BNode::Data(dn) => return Ok(Path { ancestors, leaf: dn }),
            BNode::Index(inode) => {
                let i = lookup_index(frag_store, &inode, key)?;
                let child = resolve_one(frag_store, &inode.children[i])?;
                ancestors.push((inode, i));
                node = child;
            }
        }
    }
}

/// `bt-new(store, cfg) -> root-ref`: an empty data-node root.
pub fn new<S, H, K, V>(frag_store: &FragStore<S, H>, cfg: Config) -> Result<Fid>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + IntoCbor + FromCbor,
    V: Clone + IntoCbor + FromCbor,
{
    let node = BNode::<K, V>::Data(DataNode {
        cfg,
        entries: BTreeMap::new(),
    });
    persist(frag_store, Link::inlined(node))
}

/// `bt-lookup(store, root-ref, k, not-found?)`, with `not-found?` expressed
/// idiomatically as `None`.
pub fn lookup<S, H, K, V>(frag_store: &FragStore<S, H>, root: Fid, key: &K) -> Result<Option<V>>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + FromCbor,
    V: Clone + FromCbor,
{
    let path = lookup_path(frag_store, root, key)?;
    Ok(path.leaf.entries.get(key).cloned())
}

/// `bt-insert(store, root-ref, k, v) -> root-ref'`.
pub fn insert<S, H, K, V>(frag_store: &FragStore<S, H>, root: Fid, key: K, value: V) -> Result<Fid>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + IntoCbor + FromCbor,
    V: Clone + IntoCbor + FromCbor,
{
    let Path { mut ancestors, leaf } = lookup_path(frag_store, root, &key)?;

    let mut entries = leaf.entries;
    entries.insert(key, value);
    let mut current = BNode::Data(DataNode { cfg: leaf.cfg, entries });

    while let Some((mut inode, idx)) = ancestors.pop() {
        if overflow(&current) {
            let (left, right, _median) = split(frag_store, current)?;
            let left_ref = persist(frag_store, Link::inlined(left))?;
            let right_ref = persist(frag_store, Link::inlined(right))?;
            inode
                .children
                .splice(idx..=idx, [Link::Ref(left_ref), Link::Ref(right_ref)]);
        } else {
            let node_ref = persist(frag_store, Link::inlined(current))?;
            inode.children[idx] = Link::Ref(node_ref);
        }
        current = BNode::Index(inode);
    }

    if overflow(&current) {
        let cfg = node_cfg(&current);
        let (left, right, _median) = split(frag_store, current)?;
        let left_ref = persist(frag_store, Link::inlined(left))?;
        let right_ref = persist(frag_store, Link::inlined(right))?;
        let new_root = BNode::<K, V>::Index(IndexNode {
            cfg,
            children: vec![Link::Ref(left_ref), Link::Ref(right_ref)],
            op_buf: Vec::new(),
        });
        persist(frag_store, Link::inlined(new_root))
    } else {
        persist(frag_store, Link::inlined(current))
    }
}

fn node_cfg<K, V>(node: &BNode<K, V>) -> Config {
    match node {
        BNode::Data(dn) => dn.cfg,
        BNode::Index(inode) => inode.cfg,
    }
}

/// Select the larger neighboring sibling of `inode.children[idx]`: the
/// right sibling if it has strictly more entries, else the left; a
/// boundary index has only one side to choose from.
/// Returns `(sibling_index, current_is_left)`.
fn choose_sibling<S, H, K, V>(frag_store: &FragStore<S, H>, inode: &IndexNode<K, V>, idx: usize) -> Result<(usize, bool)>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + FromCbor,
    V: Clone + FromCbor,
{
    let has_left = idx > 0;
    let has_right = idx + 1 < inode.children.len();

    let count = |i: usize| -> Result<usize> {
        Ok(match resolve_one(frag_store, &inode.children[i])? {
            BNode::Data(dn) => dn.entries.len(),
            BNode::Index(inode) => inode.children.len(),
        })
    };

    match (has_left, has_right) {
        (false, true) => Ok((idx + 1, true)),
        (true, false) => Ok((idx - 1, false)),
        (true, true) => {
            if count(idx + 1)? > count(idx - 1)? {
                Ok((idx + 1, true))
            } else {
                Ok((idx - 1, false))
            }
        }
        (false, false) => unreachable!("an only child cannot underflow beneath a real index node"),
    }
}

/// `bt-delete(store, root-ref, k) -> root-ref'`.
pub fn delete<S, H, K, V>(frag_store: &FragStore<S, H>, root: Fid, key: &K) -> Result<Fid>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + IntoCbor + FromCbor,
    V: Clone + IntoCbor + FromCbor,
{
    let Path { mut ancestors, leaf } = lookup_path(frag_store, root, key)?;

    let mut entries = leaf.entries;
    entries.remove(key);
    let mut current = BNode::Data(DataNode { cfg: leaf.cfg, entries });

    while let Some((mut inode, idx)) = ancestors.pop() {
        if !underflow(&current) {
            let node_ref = persist(frag_store, Link::inlined(current))?;
            inode.children[idx] = Link::Ref(node_ref);
        } else {
            let (sib_idx, current_is_left) = choose_sibling(frag_store, &inode, idx)?;
            let sibling = resolve_one(frag_store, &inode.children[sib_idx])?;
            let (left, right) = if current_is_left {
                (current, sibling)
            } else {
                (sibling, current)
            };
            let merged = merge(left, right);
            let (lo, hi) = (idx.min(sib_idx), idx.max(sib_idx));

            if overflow(&merged) {
                let (l, r, _median) = split(frag_store, merged)?;
                let l_ref = persist(frag_store, Link::inlined(l))?;
                let r_ref = persist(frag_store, Link::inlined(r))?;
                inode.children.splice(lo..=hi, [Link::Ref(l_ref), Link::Ref(r_ref)]);
            } else {
                let m_ref = persist(frag_store, Link::inlined(merged))?;
                inode.children.splice(lo..=hi, [Link::Ref(m_ref)]);
            }
        }
        current = BNode::Index(inode);
    }

    if let BNode::Index(inode) = &current {
        if inode.children.len() == 1 {
            return Ok(*inode.children[0]
                .as_fid()
                .expect("bubbled children are always persisted before being spliced in"));
        }
    }
    persist(frag_store, Link::inlined(current))
}

/// Lazy ascending `(k, v)` sequence produced by [`forward`]. Each step may
/// perform fragment-layer I/O, hence the fallible `Item`.
pub struct ForwardIter<'a, S, H, K, V>
where
    S: Store,
    H: ContentHash,
{
    frag_store: &'a FragStore<S, H>,
    ancestors: Vec<(IndexNode<K, V>, usize)>,
    buffer: VecDeque<(K, V)>,
}

impl<'a, S, H, K, V> Iterator for ForwardIter<'a, S, H, K, V>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + FromCbor,
    V: Clone + FromCbor,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            match right_successor(self.frag_store, &mut self.ancestors) {
                Ok(Some(leaf)) => self.buffer = leaf.entries.into_iter().collect(),
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Ascend `ancestors` until an unused right child is found, then descend
/// leftmost from there to the next data node.
fn right_successor<S, H, K, V>(
    frag_store: &FragStore<S, H>,
    ancestors: &mut Vec<(IndexNode<K, V>, usize)>,
) -> Result<Option<DataNode<K, V>>>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + FromCbor,
    V: Clone + FromCbor,
{
    while let Some((inode, idx)) = ancestors.pop() {
        if idx + 1 < inode.children.len() {
            let next_idx = idx + 1;
            let mut node = resolve_one(frag_store, &inode.children[next_idx])?;
            ancestors.push((inode, next_idx));
            loop {
                match node {
                    BNode::Data(dn) => return Ok(Some(dn)),
                    BNode::Index(child_inode) => {
                        let first = resolve_one(frag_store, &child_inode.children[0])?;
                        ancestors.push((child_inode, 0));
                        node = first;
                    }
                }
            }
        }
    }
    Ok(None)
}

/// `bt-forward(store, root-ref, k)`: ascending `(k', v)` pairs with
/// `k' >= k`.
pub fn forward<'a, S, H, K, V>(frag_store: &'a FragStore<S, H>, root: Fid, key: &K) -> Result<ForwardIter<'a, S, H, K, V>>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + FromCbor,
    V: Clone + FromCbor,
{
    let Path { ancestors, leaf } = lookup_path(frag_store, root, key)?;
    let buffer: VecDeque<(K, V)> = leaf.entries.into_iter().filter(|(k, _)| k >= key).collect();
    Ok(ForwardIter {
        frag_store,
        ancestors,
        buffer,
    })
}

#[cfg(test)]
#[path = "btree_test.rs"]
mod btree_test;
