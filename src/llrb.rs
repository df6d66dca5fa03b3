//! Persistent red-black tree over the fragment layer.
//!
//! A node type, split from the tree-level operations that page it in and
//! out of the fragment layer. Balancing follows the classical
//! (non-left-leaning) scheme rather than a left-leaning one, matching each
//! red-red conflict shape explicitly instead of normalizing right-leaning
//! reds away first, since every sub-tree here may be a paged-out reference
//! rather than a live in-memory pointer.

use cbordata::Cborize;

use std::cmp::Ordering;

use crate::{
    fid::Fid,
    fragment::{FragStore, Link},
    store::Store,
    ContentHash, Result,
};

const RB_FRAG_VER: u32 = 0x0001;

/// Node color. The root is always black once an `insert` completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

/// In-memory red-black node: `(color, left, key, right)`.
/// Children are [`Link`]s so a node may hold a mix of not-yet-persisted
/// sub-trees and references to already-durable ones.
#[derive(Clone, Debug)]
pub struct RbNode<K> {
    pub color: Color,
    pub left: Option<Link<RbNode<K>>>,
    pub key: K,
    pub right: Option<Link<RbNode<K>>>,
}

/// Wire shape of an [`RbNode`]: children are always [`Fid`]s, never
/// inlined, since by the time a node crosses the store boundary its
/// children have already been persisted.
#[derive(Clone, Cborize)]
pub struct RbFrag<K> {
    pub black: bool,
    pub left: Option<Fid>,
    pub key: K,
    pub right: Option<Fid>,
}

impl<K> RbFrag<K> {
    const ID: u32 = RB_FRAG_VER;
}

fn to_node<K>(frag: RbFrag<K>) -> RbNode<K> {
    RbNode {
        color: if frag.black { Color::Black } else { Color::Red },
        left: frag.left.map(Link::Ref),
        key: frag.key,
        right: frag.right.map(Link::Ref),
    }
}

/// Resolve `link` one level: an already-inlined node is cloned, a
/// reference is fetched through the fragment layer (`load-ref`). The
/// returned node's own children remain unresolved [`Link`]s.
fn resolve_one<S, H, K>(frag_store: &FragStore<S, H>, link: &Link<RbNode<K>>) -> Result<RbNode<K>>
where
    S: Store,
    H: ContentHash,
    K: Clone + cbordata::FromCbor,
{
    match link {
        Link::Inlined(node) => Ok((**node).clone()),
        Link::Ref(fid) => {
            let frag: RbFrag<K> = frag_store.load_ref(fid)?;
            Ok(to_node(frag))
        }
    }
}

/// `create-ref`, specialized to a red-black sub-tree: recursively persists
/// any still-inlined descendants bottom-up, then writes this node's own
/// wire fragment through the fragment layer.
fn persist<S, H, K>(frag_store: &FragStore<S, H>, link: Link<RbNode<K>>) -> Result<Fid>
where
    S: Store,
    H: ContentHash,
    K: Clone + cbordata::IntoCbor + cbordata::FromCbor,
{
    match link {
        Link::Ref(fid) => Ok(fid),
        Link::Inlined(node) => {
            let node = *node;
            let left = match node.left {
                None => None,
                Some(child) => Some(persist(frag_store, child)?),
            };
            let right = match node.right {
                None => None,
                Some(child) => Some(persist(frag_store, child)?),
            };
            let frag = RbFrag {
                black: node.color == Color::Black,
                left,
                key: node.key,
                right,
            };
            let link = frag_store.create_ref(Link::inlined(frag))?;
            Ok(*link.as_fid().expect("create_ref always returns a Ref"))
        }
    }
}

/// `insert(root, x) -> root'`.
pub fn insert<S, H, K>(
    frag_store: &FragStore<S, H>,
    root: Option<Fid>,
    x: K,
) -> Result<Option<Fid>>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + cbordata::IntoCbor + cbordata::FromCbor,
{
    let link = root.map(Link::Ref);
    let new_root = insert_at(frag_store, link, x, 0)?.expect("insert always yields a node");
    let new_root = paint_black(frag_store, new_root)?;
    Ok(Some(persist(frag_store, new_root)?))
}

fn insert_at<S, H, K>(
    frag_store: &FragStore<S, H>,
    link: Option<Link<RbNode<K>>>,
    x: K,
    depth: usize,
) -> Result<Option<Link<RbNode<K>>>>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + cbordata::IntoCbor + cbordata::FromCbor,
{
    let link = match link {
        None => {
            return Ok(Some(Link::inlined(RbNode {
                color: Color::Red,
                left: None,
                key: x,
                right: None,
            })))
        }
        Some(link) => link,
    };

    let node = resolve_one(frag_store, &link)?;
    match x.cmp(&node.key) {
        Ordering::Equal => Ok(Some(link)),
        Ordering::Less => {
            let left = insert_at(frag_store, node.left, x, depth + 1)?;
            let merged = RbNode {
                color: node.color,
                left,
                key: node.key,
                right: node.right,
            };
            Ok(Some(balance(frag_store, merged, depth)?))
        }
        Ordering::Greater => {
            let right = insert_at(frag_store, node.right, x, depth + 1)?;
            let merged = RbNode {
                color: node.color,
                left: node.left,
                key: node.key,
                right,
            };
            Ok(Some(balance(frag_store, merged, depth)?))
        }
    }
}

/// `balance(subtree, depth)`: match one of the four
/// classical re-balance patterns, materializing grandchildren as needed to
/// detect two reds in a row. The depth-modulated flush policy persists the
/// four resulting grandchildren whenever `depth % 3 == 0`.
fn balance<S, H, K>(
    frag_store: &FragStore<S, H>,
    node: RbNode<K>,
    depth: usize,
) -> Result<Link<RbNode<K>>>
where
    S: Store,
    H: ContentHash,
    K: Clone + cbordata::IntoCbor + cbordata::FromCbor,
{
    if node.color == Color::Red {
        return Ok(Link::inlined(node));
    }

    let RbNode {
        color,
        left,
        key: z,
        right,
    } = node;

    if let Some(l_link) = &left {
        let l = resolve_one(frag_store, l_link)?;
        if l.color == Color::Red {
            if let Some(ll_link) = &l.left {
                let ll = resolve_one(frag_store, ll_link)?;
                if ll.color == Color::Red {
                    // black(red(red(a,x,b),y,c),z,d)
                    return finish_balance(frag_store, ll.left, ll.key, ll.right, l.key, l.right, z, right, depth);
                }
            }
            if let Some(lr_link) = &l.right {
                let lr = resolve_one(frag_store, lr_link)?;
                if lr.color == Color::Red {
                    // black(red(a,x,red(b,y,c)),z,d)
                    return finish_balance(frag_store, l.left, l.key, lr.left, lr.key, lr.right, z, right, depth);
                }
            }
        }
    }

    if let Some(r_link) = &right {
        let r = resolve_one(frag_store, r_link)?;
        if r.color == Color::Red {
            if let Some(rl_link) = &r.left {
                let rl = resolve_one(frag_store, rl_link)?;
                if rl.color == Color::Red {
                    // black(a,x,red(red(b,y,c),z,d))
                    return finish_balance(frag_store, left, z, rl.left, rl.key, rl.right, r.key, r.right, depth);
                }
            }
            if let Some(rr_link) = &r.right {
                let rr = resolve_one(frag_store, rr_link)?;
                if rr.color == Color::Red {
                    // black(a,x,red(b,y,red(c,z,d)))
                    return finish_balance(frag_store, left, z, r.left, r.key, rr.left, rr.key, rr.right, depth);
                }
            }
        }
    }

    Ok(Link::inlined(RbNode {
        color,
        left,
        key: z,
        right,
    }))
}

#[allow(clippy::too_many_arguments)]
fn finish_balance<S, H, K>(
    frag_store: &FragStore<S, H>,
    a: Option<Link<RbNode<K>>>,
    x: K,
    b: Option<Link<RbNode<K>>>,
    y: K,
    c: Option<Link<RbNode<K>>>,
    z: K,
    d: Option<Link<RbNode<K>>>,
    depth: usize,
) -> Result<Link<RbNode<K>>>
where
    S: Store,
    H: ContentHash,
    K: Clone + cbordata::IntoCbor + cbordata::FromCbor,
{
    let (a, b, c, d) = if depth % 3 == 0 {
        log::trace!("llrb: flushing grandchildren at depth {}", depth);
        (
            flush(frag_store, a)?,
            flush(frag_store, b)?,
            flush(frag_store, c)?,
            flush(frag_store, d)?,
        )
    } else {
        (a, b, c, d)
    };

    let left = RbNode {
        color: Color::Black,
        left: a,
        key: x,
        right: b,
    };
    let right = RbNode {
        color: Color::Black,
        left: c,
        key: z,
        right: d,
    };
    Ok(Link::inlined(RbNode {
        color: Color::Red,
        left: Some(Link::inlined(left)),
        key: y,
        right: Some(Link::inlined(right)),
    }))
}

fn flush<S, H, K>(
    frag_store: &FragStore<S, H>,
    link: Option<Link<RbNode<K>>>,
) -> Result<Option<Link<RbNode<K>>>>
where
    S: Store,
    H: ContentHash,
    K: Clone + cbordata::IntoCbor + cbordata::FromCbor,
{
    match link {
        None => Ok(None),
        Some(link) => Ok(Some(Link::Ref(persist(frag_store, link)?))),
    }
}

fn paint_black<S, H, K>(
    frag_store: &FragStore<S, H>,
    link: Link<RbNode<K>>,
) -> Result<Link<RbNode<K>>>
where
    S: Store,
    H: ContentHash,
    K: Clone + cbordata::FromCbor,
{
    let node = resolve_one(frag_store, &link)?;
    if node.color == Color::Black {
        return Ok(link);
    }
    Ok(Link::inlined(RbNode {
        color: Color::Black,
        ..node
    }))
}

/// `find-val(root, x)`.
pub fn find<S, H, K>(frag_store: &FragStore<S, H>, root: &Option<Fid>, x: &K) -> Result<bool>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + cbordata::FromCbor,
{
    let mut cur = root.map(Link::Ref);
    loop {
        let link = match cur {
            None => return Ok(false),
            Some(link) => link,
        };
        let node = resolve_one(frag_store, &link)?;
        match x.cmp(&node.key) {
            Ordering::Equal => return Ok(true),
            Ordering::Less => cur = node.left,
            Ordering::Greater => cur = node.right,
        }
    }
}

/// `range-vals(root, s, e)`: exclusive on both ends.
pub fn range<S, H, K>(
    frag_store: &FragStore<S, H>,
    root: &Option<Fid>,
    s: &K,
    e: &K,
) -> Result<Vec<K>>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + cbordata::FromCbor,
{
    let mut out = Vec::new();
    range_into(frag_store, &root.map(Link::Ref), s, e, &mut out)?;
    Ok(out)
}

fn range_into<S, H, K>(
    frag_store: &FragStore<S, H>,
    link: &Option<Link<RbNode<K>>>,
    s: &K,
    e: &K,
    out: &mut Vec<K>,
) -> Result<()>
where
    S: Store,
    H: ContentHash,
    K: Ord + Clone + cbordata::FromCbor,
{
    let link = match link {
        Some(link) => link,
        None => return Ok(()),
    };
    let node = resolve_one(frag_store, link)?;

    if s < &node.key && &node.key < e {
        range_into(frag_store, &node.left, s, e, out)?;
        out.push(node.key.clone());
        range_into(frag_store, &node.right, s, e, out)?;
    } else if s >= &node.key && e <= &node.key {
        // degenerate range (e <= s): nothing beneath this node qualifies.
    } else if s >= &node.key {
        range_into(frag_store, &node.right, s, e, out)?;
    } else if e <= &node.key {
        range_into(frag_store, &node.left, s, e, out)?;
    }

    Ok(())
}

/// Walk the tree verifying the classical red-black invariants: no red node
/// has a red child, and every root-to-leaf path has the same black-height.
/// Used by tests; not part of the public operational surface.
#[cfg(test)]
fn black_height<S, H, K>(
    frag_store: &FragStore<S, H>,
    link: &Option<Link<RbNode<K>>>,
) -> Result<usize>
where
    S: Store,
    H: ContentHash,
    K: Clone + cbordata::FromCbor,
{
    let link = match link {
        Some(link) => link,
        None => return Ok(1),
    };
    let node = resolve_one(frag_store, link)?;
    if node.color == Color::Red {
        if let Some(l) = &node.left {
            let lnode = resolve_one(frag_store, l)?;
            assert_ne!(lnode.color, Color::Red, "red node has red left child");
        }
        if let Some(r) = &node.right {
            let rnode = resolve_one(frag_store, r)?;
            assert_ne!(rnode.color, Color::Red, "red node has red right child");
        }
    }
    let lh = black_height(frag_store, &node.left)?;
    let rh = black_height(frag_store, &node.right)?;
    assert_eq!(lh, rh, "unequal black-heights");
    Ok(lh + if node.color == Color::Black { 1 } else { 0 })
}

#[cfg(test)]
#[path = "llrb_test.rs"]
mod llrb_test;
