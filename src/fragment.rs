//! The fragment reference + cache layer.
//!
//! A [`FragStore`] bundles a [`Store`], a [`ContentHash`] and a [`Cache`].
//! Tree modules (`llrb`, `btree`) build their node-specific resolve/persist
//! logic on top of the three primitives here (`create_ref`, `resolve_link`,
//! `load_ref`) rather than this module knowing about any concrete node
//! shape.

use cbordata::{FromCbor, IntoCbor};

use crate::{cache::Cache, err_at, fid::Fid, store::Store, ContentHash, Result};

/// A child slot: either a fragment not yet persisted (`Inlined`), or a
/// lightweight handle to one already written to the store (`Ref`).
///
/// This is a tagged sum, not a cycle: a `Ref` always points
/// at strictly older, already-durable content. `Link` itself is never
/// encoded as a whole: by the time a node is handed to [`FragStore::create_ref`],
/// its own child slots have already been converted to `Ref`s, so only the
/// plain, Fid-keyed wire shape of `T` ever crosses the store boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum Link<T> {
    Inlined(Box<T>),
    Ref(Fid),
}

impl<T> Link<T> {
    pub fn inlined(value: T) -> Link<T> {
        Link::Inlined(Box::new(value))
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Link::Ref(_))
    }

    pub fn as_fid(&self) -> Option<&Fid> {
        match self {
            Link::Ref(fid) => Some(fid),
            Link::Inlined(_) => None,
        }
    }
}

/// Bundles the durable store, the content-hasher and the read cache behind
/// the fragment-layer operations.
pub struct FragStore<S, H = crate::fid::Sha1Hash>
where
    S: Store,
    H: ContentHash,
{
    store: S,
    hasher: H,
    cache: Cache,
}

impl<S> FragStore<S, crate::fid::Sha1Hash>
where
    S: Store,
{
    /// Build a `FragStore` with the default `sha-1` content hasher and the
    /// default cache bound.
    pub fn new(store: S) -> Self {
        FragStore {
            store,
            hasher: crate::fid::Sha1Hash,
            cache: Cache::default(),
        }
    }
}

impl<S, H> FragStore<S, H>
where
    S: Store,
    H: ContentHash,
{
    pub fn with_hasher(store: S, hasher: H) -> Self {
        FragStore {
            store,
            hasher,
            cache: Cache::default(),
        }
    }

    pub fn with_cache(store: S, hasher: H, cache: Cache) -> Self {
        FragStore {
            store,
            hasher,
            cache,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// `create-ref(fragment) -> reference`.
    ///
    /// If `link` already carries a reference, return it unchanged.
    /// Otherwise encode the fragment, compute its [`Fid`], and write it
    /// through to the store (and cache) unless it is already present
    /// under that id — content-addressing makes a repeat write a no-op,
    /// so persisting the same value twice is idempotent.
    pub fn create_ref<T>(&self, link: Link<T>) -> Result<Link<T>>
    where
        T: IntoCbor + Clone,
    {
        let value = match link {
            Link::Ref(fid) => return Ok(Link::Ref(fid)),
            Link::Inlined(value) => *value,
        };

        let bytes = crate::util::into_cbor_bytes(value.clone())?;
        let fid = self.hasher.fid(&bytes);

        if self.cache.get(&fid).is_none() && !err_at!(StoreUnavailable, self.store.exists(&fid))? {
            err_at!(StoreUnavailable, self.store.put(&fid, bytes.clone()))?;
        }
        self.cache.put(fid, bytes);

        Ok(Link::Ref(fid))
    }

    /// `load-ref(reference) -> fragment`.
    ///
    /// Consults the cache first; on a miss, fetches from the store and
    /// populates the cache. A missing backing fragment is a
    /// store-inconsistency: the index is corrupt.
    pub fn load_ref<T>(&self, fid: &Fid) -> Result<T>
    where
        T: FromCbor,
    {
        let bytes = match self.cache.get(fid) {
            Some(bytes) => bytes,
            None => {
                let bytes = err_at!(StoreUnavailable, self.store.get(fid))?;
                let bytes = match bytes {
                    Some(bytes) => bytes,
                    None => return crate::store::missing_fragment(fid),
                };
                self.cache.put(*fid, bytes.clone());
                bytes
            }
        };

        // A fragment fetched by its own Fid that fails to decode is
        // indistinguishable from one that was never written correctly in
        // the first place: both are store-inconsistency, not a generic
        // encoding failure.
        match crate::util::from_cbor_bytes(&bytes) {
            Ok((value, _)) => Ok(value),
            Err(e) => {
                log::warn!("store-inconsistency: fragment {:?} failed to decode: {}", fid, e);
                err_at!(StoreInconsistent, msg: "fragment {:?} failed to decode: {}", fid, e)
            }
        }
    }

    /// Resolve a [`Link`] to its owned fragment value, whether it is
    /// already inlined or needs a store round-trip.
    pub fn resolve_link<T>(&self, link: &Link<T>) -> Result<T>
    where
        T: FromCbor + Clone,
    {
        match link {
            Link::Inlined(value) => Ok(value.as_ref().clone()),
            Link::Ref(fid) => self.load_ref(fid),
        }
    }

    /// Publish `link` (persisting it if still inlined) under the given
    /// stable name.
    pub fn publish_root<T>(&self, name: &str, link: Link<T>) -> Result<Fid>
    where
        T: IntoCbor + Clone,
    {
        let link = self.create_ref(link)?;
        let fid = *link.as_fid().expect("create_ref always returns a Ref");
        let bytes = crate::util::into_cbor_bytes(fid)?;
        err_at!(StoreUnavailable, self.store.put_named(name, bytes))?;
        Ok(fid)
    }

    /// Read the current root reference published under `name`, if any.
    pub fn read_root(&self, name: &str) -> Result<Option<Fid>> {
        match err_at!(StoreUnavailable, self.store.get_named(name))? {
            Some(bytes) => {
                let (fid, _) = crate::util::from_cbor_bytes(&bytes)?;
                Ok(Some(fid))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod fragment_test {
    use super::*;
    use crate::store::MemStore;
    use cbordata::Cborize;

    #[derive(Clone, Cborize, PartialEq, Debug)]
    struct Leaf {
        value: i64,
    }

    impl Leaf {
        const ID: u32 = 1;
    }

    #[test]
    fn test_create_ref_idempotent() {
        let frag = FragStore::new(MemStore::new());
        let a = frag.create_ref(Link::inlined(Leaf { value: 42 })).unwrap();
        let b = frag.create_ref(Link::inlined(Leaf { value: 42 })).unwrap();
        assert_eq!(a.as_fid(), b.as_fid());
        assert_eq!(frag.store().len(), 1);
    }

    #[test]
    fn test_load_ref_roundtrip() {
        let frag = FragStore::new(MemStore::new());
        let original = Leaf { value: 7 };
        let link = frag.create_ref(Link::inlined(original.clone())).unwrap();
        let fid = *link.as_fid().unwrap();
        let loaded: Leaf = frag.load_ref(&fid).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_load_ref_missing_is_store_inconsistent() {
        let frag: FragStore<MemStore> = FragStore::new(MemStore::new());
        let bogus = crate::fid::Sha1Hash.fid(b"never written");
        match frag.load_ref::<Leaf>(&bogus) {
            Err(crate::Error::StoreInconsistent(_, _)) => (),
            other => panic!("expected StoreInconsistent, got {:?}", other),
        }
    }

    #[test]
    fn test_create_ref_passes_through_existing_ref() {
        let frag = FragStore::new(MemStore::new());
        let link = frag.create_ref(Link::inlined(Leaf { value: 1 })).unwrap();
        let fid = *link.as_fid().unwrap();
        let passthrough = frag.create_ref(Link::Ref(fid)).unwrap();
        assert_eq!(passthrough.as_fid(), Some(&fid));
    }
}
