use std::{
    marker::PhantomData,
    mem::{self, size_of},
};

use crate::{
    id::{ResourceRef, TypedId},
    resource::ResourceError,
    Epoch, Index,
};

/// An entry in a `Storage::map` table.
#[derive(Debug)]
enum Element<T> {
    /// There are no live ids with this index. The epoch is the one the
    /// next id allocated at this index will carry.
    Vacant(Epoch),

    /// There is one live id with this index, allocated at the given
    /// epoch.
    Occupied(T, Epoch),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageReport {
    pub num_occupied: usize,
    pub num_vacant: usize,
    pub element_size: usize,
}

impl StorageReport {
    pub fn is_empty(&self) -> bool {
        self.num_occupied + self.num_vacant == 0
    }
}

/// A table of `T` values indexed by the id type `I`.
///
/// Index values are recycled through a free list, lowest-freed-last, so the
/// table stays dense. Every reuse bumps the epoch stored in the slot, and an
/// id only resolves while its epoch matches: a stale id held by the host
/// after its record was dropped fails lookup instead of aliasing whatever
/// record took the slot next.
#[derive(Debug)]
pub(crate) struct Storage<T, I: TypedId> {
    map: Vec<Element<T>>,
    free: Vec<Index>,
    kind: &'static str,
    _phantom: PhantomData<I>,
}

impl<T, I: TypedId + Into<ResourceRef>> Storage<T, I> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            map: Vec::new(),
            free: Vec::new(),
            kind,
            _phantom: PhantomData,
        }
    }

    /// Allocate an id and store the value built for it.
    ///
    /// The closure receives the id up front so records that need to refer
    /// to themselves (auto-layout pipelines) can do so.
    pub(crate) fn insert_with(&mut self, make: impl FnOnce(I) -> T) -> I {
        let (index, epoch) = match self.free.pop() {
            Some(index) => match self.map[index as usize] {
                Element::Vacant(epoch) => (index, epoch),
                Element::Occupied(..) => unreachable!("{}[{}] is on the free list", self.kind, index),
            },
            None => {
                self.map.push(Element::Vacant(1));
                (self.map.len() as Index - 1, 1)
            }
        };
        let id = I::zip(index, epoch);
        self.map[index as usize] = Element::Occupied(make(id), epoch);
        id
    }

    pub(crate) fn insert(&mut self, value: T) -> I {
        self.insert_with(|_| value)
    }

    /// Get a reference to the record behind `id`.
    ///
    /// Fails if the id was never allocated here or its record was removed.
    pub(crate) fn get(&self, id: I) -> Result<&T, ResourceError> {
        let (index, epoch) = id.unzip();
        match self.map.get(index as usize) {
            Some(&Element::Occupied(ref value, storage_epoch)) if storage_epoch == epoch => {
                Ok(value)
            }
            _ => Err(ResourceError::Invalid(id.into())),
        }
    }

    pub(crate) fn get_mut(&mut self, id: I) -> Result<&mut T, ResourceError> {
        let (index, epoch) = id.unzip();
        match self.map.get_mut(index as usize) {
            Some(&mut Element::Occupied(ref mut value, storage_epoch))
                if storage_epoch == epoch =>
            {
                Ok(value)
            }
            _ => Err(ResourceError::Invalid(id.into())),
        }
    }

    /// Remove the record behind `id`, returning it if it was alive.
    pub(crate) fn remove(&mut self, id: I) -> Option<T> {
        let (index, epoch) = id.unzip();
        match self.map.get(index as usize) {
            Some(&Element::Occupied(_, storage_epoch)) if storage_epoch == epoch => {}
            _ => return None,
        }
        let next_epoch = epoch.wrapping_add(1).max(1);
        match mem::replace(&mut self.map[index as usize], Element::Vacant(next_epoch)) {
            Element::Occupied(value, _) => {
                self.free.push(index);
                Some(value)
            }
            Element::Vacant(_) => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        self.kind
    }

    pub(crate) fn generate_report(&self) -> StorageReport {
        let mut report = StorageReport {
            element_size: size_of::<T>(),
            ..Default::default()
        };
        for element in self.map.iter() {
            match *element {
                Element::Occupied(..) => report.num_occupied += 1,
                Element::Vacant(_) => report.num_vacant += 1,
            }
        }
        report
    }
}
