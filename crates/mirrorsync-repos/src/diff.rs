//! Set difference between two snapshots of identity-bearing entities.
//!
//! Each entity exposes one or more identities; two entities from different
//! snapshots are the same entity when they share any identity. Matching on
//! several identities lets a rename (stable external ID) or a re-hosting
//! (stable name) be recognised as a modification instead of a delete/add pair.

use std::collections::HashMap;

/// An entity that can take part in a [`Diff`].
pub trait Diffable {
    /// Identities of this entity, most general first.
    ///
    /// The first identity is also the sort key of the diff buckets.
    fn ids(&self) -> Vec<String>;
}

/// Outcome of matching a `before` entity to an `after` entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matched<T> {
    Modified(T),
    Unmodified(T),
}

/// Four-way partition of two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<T> {
    /// In `after` only.
    pub added: Vec<T>,
    /// In `before` only; holds the `before` entity.
    pub deleted: Vec<T>,
    /// Matched and changed.
    pub modified: Vec<T>,
    /// Matched and unchanged.
    pub unmodified: Vec<T>,
}

impl<T> Default for Diff<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            deleted: Vec::new(),
            modified: Vec::new(),
            unmodified: Vec::new(),
        }
    }
}

impl<T: Diffable> Diff<T> {
    /// Diff `before` against `after`.
    ///
    /// Matched entities land in `modified` or `unmodified` as the `after`
    /// entity, depending on `modified(before, after)`. Entities without any
    /// identity never match: they are `deleted` or `added` as they stand.
    pub fn new<F>(before: Vec<T>, after: Vec<T>, mut modified: F) -> Self
    where
        F: FnMut(&T, &T) -> bool,
    {
        Self::new_with(before, after, |b, a| {
            if modified(&b, &a) {
                Matched::Modified(a)
            } else {
                Matched::Unmodified(a)
            }
        })
    }

    /// Like [`Diff::new`], but `merge` decides both the bucket and the entity
    /// that is recorded for each matched pair.
    pub fn new_with<F>(before: Vec<T>, after: Vec<T>, mut merge: F) -> Self
    where
        F: FnMut(T, T) -> Matched<T>,
    {
        // Later entities win shared identities.
        let mut after_index = index_ids(&after);
        let before_index = index_ids(&before);

        let mut after: Vec<Option<T>> = after.into_iter().map(Some).collect();
        let mut diff = Diff::default();

        for (i, b) in before.into_iter().enumerate() {
            let ids = b.ids();
            // Shadowed duplicate, merged into a later entity.
            if !ids.is_empty() && !ids.iter().any(|id| before_index.get(id) == Some(&i)) {
                continue;
            }

            let found = ids.iter().filter_map(|id| after_index.get(id).copied()).last();
            let Some(j) = found else {
                diff.deleted.push(b);
                continue;
            };

            let Some(a) = after[j].take() else {
                continue;
            };
            for id in a.ids() {
                if after_index.get(&id) == Some(&j) {
                    after_index.remove(&id);
                }
            }

            match merge(b, a) {
                Matched::Modified(e) => diff.modified.push(e),
                Matched::Unmodified(e) => diff.unmodified.push(e),
            }
        }

        for (j, slot) in after.into_iter().enumerate() {
            let Some(a) = slot else { continue };
            let ids = a.ids();
            if ids.is_empty() || ids.iter().any(|id| after_index.get(id) == Some(&j)) {
                diff.added.push(a);
            }
        }

        diff
    }

    /// Order every bucket by first identity.
    pub fn sort(&mut self) {
        for bucket in [
            &mut self.added,
            &mut self.deleted,
            &mut self.modified,
            &mut self.unmodified,
        ] {
            bucket.sort_by_cached_key(|e| e.ids().into_iter().next().unwrap_or_default());
        }
    }
}

impl<T> Diff<T> {
    /// True when nothing was added, deleted or modified.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }

    /// Number of entities across all four buckets.
    pub fn len(&self) -> usize {
        self.added.len() + self.deleted.len() + self.modified.len() + self.unmodified.len()
    }

    /// Every entity, bucket by bucket.
    pub fn all(&self) -> impl Iterator<Item = &T> {
        self.added
            .iter()
            .chain(&self.deleted)
            .chain(&self.modified)
            .chain(&self.unmodified)
    }
}

fn index_ids<T: Diffable>(entities: &[T]) -> HashMap<String, usize> {
    let mut index = HashMap::with_capacity(entities.len() * 2);
    for (i, e) in entities.iter().enumerate() {
        for id in e.ids() {
            index.insert(id, i);
        }
    }
    index
}
