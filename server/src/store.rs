// fadebin Ephemeral Paste Server
// Copyright (C) 2021  Edward Shen
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Persistent paste storage.
//!
//! Records live in RocksDB under `paste/<id>`, bincode encoded. A second key
//! space, `created/<inverted creation millis><inverted seq>`, indexes them
//! newest first so listing is a single forward scan. `seq` is a per-store
//! counter, so pastes created within the same millisecond still list in
//! reverse creation order.
//!
//! The store is the only place visibility is decided. Every operation takes
//! the current instant from the caller and never reads the clock itself.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use fadebin_common::PasteSummary;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rocksdb::{Direction, IteratorMode, WriteBatch, DB};
use thiserror::Error;
use tracing::{debug, error};

use crate::paste::{NewPaste, Paste, Unavailable, ValidationError};
use crate::short_code::{self, PasteId};

const PASTE_PREFIX: &[u8] = b"paste/";
const CREATED_PREFIX: &[u8] = b"created/";
/// Never a valid paste key, so reading it is a pure round trip.
const HEALTH_KEY: &[u8] = b"healthz";

const LOCK_STRIPES: usize = 64;
const MAX_ID_ATTEMPTS: usize = 1000;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Unavailable(#[from] Unavailable),
    #[error("storage failure: {0}")]
    Storage(#[from] rocksdb::Error),
    #[error("corrupt paste record: {0}")]
    Codec(#[from] bincode::Error),
    #[error("failed to find an unused short code")]
    IdSpace,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub struct PasteStore {
    db: DB,
    /// Serializes check-and-increment per record. Records hash onto a fixed
    /// set of stripes, so unrelated pastes rarely contend.
    locks: Box<[Mutex<()>]>,
    rng: Mutex<StdRng>,
    next_seq: AtomicU64,
}

impl PasteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_rng(path, StdRng::from_entropy())
    }

    pub fn with_rng(path: impl AsRef<Path>, rng: StdRng) -> Result<Self> {
        let db = DB::open_default(path)?;
        let next_seq = AtomicU64::new(next_seq(&db)?);
        Ok(Self {
            db,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            rng: Mutex::new(rng),
            next_seq,
        })
    }

    /// Validates and stores a new paste created at `now`.
    pub fn create(&self, new: NewPaste, now: DateTime<Utc>) -> Result<Paste> {
        let draft = new.validate(now)?;
        let (id, _guard) = self.allocate_id()?;
        let paste = draft.into_paste(id, self.next_seq.fetch_add(1, Ordering::Relaxed));

        let mut batch = WriteBatch::default();
        batch.put(paste_key(&id), bincode::serialize(&paste)?);
        batch.put(created_key(&paste), id.as_bytes());
        self.db.write(batch)?;

        debug!(%id, expires_at = ?paste.expires_at, max_views = paste.max_views, "Created paste");
        Ok(paste)
    }

    /// Summaries of every paste not yet expired by time at `now`, newest
    /// first. View exhausted pastes are still listed. Never counts as a view.
    pub fn list(&self, now: DateTime<Utc>) -> Result<Vec<PasteSummary>> {
        let mut summaries = Vec::new();
        let index = self
            .db
            .iterator(IteratorMode::From(CREATED_PREFIX, Direction::Forward));

        for entry in index {
            let (key, id) = entry?;
            if !key.starts_with(CREATED_PREFIX) {
                break;
            }

            // The record may have been purged between the index read and now.
            let Some(paste) = self.get_by_key(&[PASTE_PREFIX, &id[..]].concat())? else {
                continue;
            };

            if !paste.is_time_expired(now) {
                summaries.push(paste.summary());
            }
        }

        Ok(summaries)
    }

    /// Serves a paste, counting the view against its limit.
    ///
    /// For view limited pastes the visibility check and the increment happen
    /// under the record's lock stripe, so a paste with one view left is served
    /// exactly once no matter how many readers race for it. Pastes without a
    /// view limit are never written to and take no lock.
    ///
    /// The returned snapshot reflects the view just counted.
    pub fn fetch_and_consume(&self, id: &PasteId, now: DateTime<Utc>) -> Result<Paste> {
        let paste = self.get(id)?.ok_or(Unavailable::Missing)?;

        if paste.is_time_expired(now) {
            self.purge(&paste)?;
            return Err(Unavailable::Expired.into());
        }

        if !paste.is_view_limited() {
            return Ok(paste);
        }

        let _guard = self.lock(id);
        // Another reader may have taken the last view since the first read.
        let mut paste = self.get(id)?.ok_or(Unavailable::Missing)?;
        paste.consume(now)?;
        self.db.put(paste_key(id), bincode::serialize(&paste)?)?;

        Ok(paste)
    }

    /// Raw lookup. Does not evaluate expiry and does not count a view.
    pub fn get(&self, id: &PasteId) -> Result<Option<Paste>> {
        self.get_by_key(&paste_key(id))
    }

    pub fn ping(&self) -> Result<()> {
        self.db.get_pinned(HEALTH_KEY)?;
        Ok(())
    }

    fn get_by_key(&self, key: &[u8]) -> Result<Option<Paste>> {
        match self.db.get_pinned(key)? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Finds an unused short code. The returned guard keeps the code's stripe
    /// locked until the caller has written the record.
    fn allocate_id(&self) -> Result<(PasteId, MutexGuard<'_, ()>)> {
        // Statistics show that running out of attempts is very unlikely
        for _ in 0..MAX_ID_ATTEMPTS {
            let id: PasteId = self
                .rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .sample(short_code::Generator);

            let guard = self.lock(&id);
            if self.db.get_pinned(paste_key(&id))?.is_none() {
                return Ok((id, guard));
            }

            debug!(%id, "Short code collision");
        }

        error!("Failed to generate a valid shortcode");
        Err(Error::IdSpace)
    }

    fn purge(&self, paste: &Paste) -> Result<()> {
        let _guard = self.lock(&paste.id);
        let mut batch = WriteBatch::default();
        batch.delete(paste_key(&paste.id));
        batch.delete(created_key(paste));
        self.db.write(batch)?;

        debug!(id = %paste.id, "Purged expired paste");
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn lock(&self, id: &PasteId) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let stripe = (hasher.finish() % LOCK_STRIPES as u64) as usize;
        // The guarded value is (), so a poisoned lock has nothing to repair.
        self.locks[stripe]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn paste_key(id: &PasteId) -> Vec<u8> {
    [PASTE_PREFIX, &id.as_bytes()[..]].concat()
}

fn created_key(paste: &Paste) -> Vec<u8> {
    let millis = u64::try_from(paste.created_at.timestamp_millis()).unwrap_or_default();
    [
        CREATED_PREFIX,
        &(u64::MAX - millis).to_be_bytes()[..],
        &(u64::MAX - paste.seq).to_be_bytes()[..],
    ]
    .concat()
}

/// Continues the sequence after the newest indexed paste. That entry holds
/// the highest `seq` of its millisecond, which is all the tie-break needs.
fn next_seq(db: &DB) -> Result<u64> {
    let newest = db
        .iterator(IteratorMode::From(CREATED_PREFIX, Direction::Forward))
        .next()
        .transpose()?;

    let inverted = newest
        .as_ref()
        .and_then(|(key, _)| key.strip_prefix(CREATED_PREFIX))
        .and_then(|rest| rest.get(8..16))
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map(u64::from_be_bytes);

    Ok(inverted.map_or(0, |inverted| (u64::MAX - inverted).saturating_add(1)))
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn store() -> (TempDir, PasteStore) {
        let dir = TempDir::new().unwrap();
        let store = PasteStore::with_rng(dir.path(), StdRng::seed_from_u64(1)).unwrap();
        (dir, store)
    }

    fn new_paste(content: &str, ttl_seconds: i64, max_views: i64) -> NewPaste {
        NewPaste {
            title: None,
            content: content.to_string(),
            ttl_seconds,
            max_views,
        }
    }

    fn assert_unavailable(result: Result<Paste>, expected: Unavailable) {
        match result {
            Err(Error::Unavailable(reason)) => assert_eq!(reason, expected),
            other => panic!("expected {expected:?}, got {other:?}"),
        }
    }

    #[test]
    fn fetch_right_after_create_returns_content() {
        let (_dir, store) = store();
        let content = "line one\n  <b>line two</b> & more\n";
        let created = store.create(new_paste(content, 60, 5), t0()).unwrap();

        let fetched = store.fetch_and_consume(&created.id, t0()).unwrap();
        assert_eq!(fetched.content, content);
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.views_count, 1);
    }

    #[test]
    fn invalid_pastes_are_not_stored() {
        let (_dir, store) = store();
        let err = store.create(new_paste("  \n", 0, 0), t0()).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::BlankContent)
        ));
        let err = store.create(new_paste("x", 0, -1), t0()).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::MaxViews)));

        assert!(store.list(t0()).unwrap().is_empty());
    }

    #[test]
    fn missing_paste_is_unavailable() {
        let (_dir, store) = store();
        let id: PasteId = "23456789CFGH".parse().unwrap();
        assert_unavailable(store.fetch_and_consume(&id, t0()), Unavailable::Missing);
    }

    #[test]
    fn exactly_max_views_reads_succeed() {
        let (_dir, store) = store();
        for n in 1..=4 {
            let paste = store.create(new_paste("capped", 0, n), t0()).unwrap();
            for _ in 0..n {
                store.fetch_and_consume(&paste.id, t0()).unwrap();
            }
            for _ in 0..3 {
                assert_unavailable(
                    store.fetch_and_consume(&paste.id, t0()),
                    Unavailable::Exhausted,
                );
            }
            assert_eq!(
                store.get(&paste.id).unwrap().unwrap().views_count,
                u64::try_from(n).unwrap()
            );
        }
    }

    #[test]
    fn two_views_then_gone() {
        let (_dir, store) = store();
        let paste = store.create(new_paste("hello", 0, 2), t0()).unwrap();

        let first = store.fetch_and_consume(&paste.id, t0()).unwrap();
        assert_eq!(first.content, "hello");
        assert_eq!(first.remaining_views(), Some(1));

        let second = store.fetch_and_consume(&paste.id, t0()).unwrap();
        assert_eq!(second.content, "hello");
        assert_eq!(second.remaining_views(), Some(0));

        assert_unavailable(
            store.fetch_and_consume(&paste.id, t0()),
            Unavailable::Exhausted,
        );
    }

    #[test]
    fn one_second_ttl() {
        let (_dir, store) = store();
        let paste = store.create(new_paste("bye", 1, 0), t0()).unwrap();

        let fetched = store
            .fetch_and_consume(&paste.id, t0() + Duration::milliseconds(500))
            .unwrap();
        assert_eq!(fetched.content, "bye");
        assert_eq!(fetched.remaining_views(), None);

        assert_unavailable(
            store.fetch_and_consume(&paste.id, t0() + Duration::milliseconds(1500)),
            Unavailable::Expired,
        );
    }

    #[test]
    fn ttl_boundary() {
        let (_dir, store) = store();
        let paste = store.create(new_paste("tick", 30, 0), t0()).unwrap();
        let expires_at = t0() + Duration::seconds(30);

        store
            .fetch_and_consume(&paste.id, expires_at - Duration::milliseconds(1))
            .unwrap();
        assert_unavailable(
            store.fetch_and_consume(&paste.id, expires_at),
            Unavailable::Expired,
        );
    }

    #[test]
    fn expired_pastes_are_purged_on_read() {
        let (_dir, store) = store();
        let paste = store.create(new_paste("old", 5, 0), t0()).unwrap();
        let later = t0() + Duration::seconds(10);

        assert_unavailable(store.fetch_and_consume(&paste.id, later), Unavailable::Expired);
        assert_eq!(store.get(&paste.id).unwrap(), None);
        // Once purged it reads as missing, which callers cannot tell apart.
        assert_unavailable(store.fetch_and_consume(&paste.id, later), Unavailable::Missing);
        // Going back in time does not resurrect it.
        assert_unavailable(store.fetch_and_consume(&paste.id, t0()), Unavailable::Missing);
    }

    #[test]
    fn unlimited_pastes_are_never_written_on_read() {
        let (_dir, store) = store();
        let paste = store.create(new_paste("forever", 0, 0), t0()).unwrap();
        for day in 0..5 {
            let fetched = store
                .fetch_and_consume(&paste.id, t0() + Duration::days(day * 1000))
                .unwrap();
            assert_eq!(fetched.views_count, 0);
        }
        assert_eq!(store.get(&paste.id).unwrap().unwrap(), paste);
    }

    #[test]
    fn list_is_newest_first_and_skips_time_expired() {
        let (_dir, store) = store();
        let oldest = store.create(new_paste("a", 0, 0), t0()).unwrap();
        let short = store
            .create(new_paste("b", 10, 0), t0() + Duration::seconds(1))
            .unwrap();
        let newest = store
            .create(new_paste("c", 0, 3), t0() + Duration::seconds(2))
            .unwrap();

        let ids = |summaries: Vec<PasteSummary>| -> Vec<String> {
            summaries.into_iter().map(|s| s.id).collect()
        };

        assert_eq!(
            ids(store.list(t0() + Duration::seconds(5)).unwrap()),
            vec![newest.id.to_string(), short.id.to_string(), oldest.id.to_string()]
        );
        // `short` expires at t0 + 11s; the expiry instant itself is excluded
        assert_eq!(
            ids(store.list(t0() + Duration::seconds(11)).unwrap()),
            vec![newest.id.to_string(), oldest.id.to_string()]
        );
    }

    #[test]
    fn same_millisecond_pastes_list_newest_first() {
        let (_dir, store) = store();
        let ids: Vec<String> = (0..5)
            .map(|i| store.create(new_paste(&i.to_string(), 0, 0), t0()).unwrap())
            .map(|paste| paste.id.to_string())
            .collect();

        let listed: Vec<String> = store.list(t0()).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, ids.into_iter().rev().collect::<Vec<_>>());
    }

    #[test]
    fn sequence_continues_after_reopen() {
        let dir = TempDir::new().unwrap();
        let first = {
            let store = PasteStore::with_rng(dir.path(), StdRng::seed_from_u64(4)).unwrap();
            store.create(new_paste("first", 0, 0), t0()).unwrap()
        };

        let store = PasteStore::with_rng(dir.path(), StdRng::seed_from_u64(5)).unwrap();
        let second = store.create(new_paste("second", 0, 0), t0()).unwrap();
        assert!(second.seq > first.seq);

        let listed: Vec<String> = store.list(t0()).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![second.id.to_string(), first.id.to_string()]);
    }

    #[test]
    fn list_does_not_count_views_and_keeps_exhausted() {
        let (_dir, store) = store();
        let paste = store.create(new_paste("once", 0, 1), t0()).unwrap();

        for _ in 0..3 {
            let summaries = store.list(t0()).unwrap();
            assert_eq!(summaries.len(), 1);
            assert_eq!(summaries[0].remaining_views, Some(1));
        }
        assert_eq!(store.get(&paste.id).unwrap().unwrap().views_count, 0);

        store.fetch_and_consume(&paste.id, t0()).unwrap();
        let summaries = store.list(t0()).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].remaining_views, Some(0));
    }

    #[test]
    fn racing_for_the_last_view_serves_it_once() {
        let (_dir, store) = store();

        for _ in 0..25 {
            let paste = store.create(new_paste("secret", 0, 1), t0()).unwrap();
            let barrier = Barrier::new(2);

            let results: Vec<_> = thread::scope(|s| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        s.spawn(|| {
                            barrier.wait();
                            store.fetch_and_consume(&paste.id, t0())
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let served = results.iter().filter(|r| r.is_ok()).count();
            let exhausted = results
                .iter()
                .filter(|r| matches!(r, Err(Error::Unavailable(Unavailable::Exhausted))))
                .count();
            assert_eq!((served, exhausted), (1, 1));
            assert_eq!(store.get(&paste.id).unwrap().unwrap().views_count, 1);
        }
    }

    #[test]
    fn many_readers_never_exceed_the_cap() {
        let (_dir, store) = store();
        let paste = store.create(new_paste("popular", 0, 5), t0()).unwrap();
        let barrier = Barrier::new(16);

        let served = thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        store.fetch_and_consume(&paste.id, t0()).is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(served, 5);
        assert_eq!(store.get(&paste.id).unwrap().unwrap().views_count, 5);
    }

    #[test]
    fn pastes_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = PasteStore::with_rng(dir.path(), StdRng::seed_from_u64(2)).unwrap();
            let paste = store.create(new_paste("durable", 0, 2), t0()).unwrap();
            store.fetch_and_consume(&paste.id, t0()).unwrap();
            paste.id
        };

        let store = PasteStore::open(dir.path()).unwrap();
        let paste = store.fetch_and_consume(&id, t0()).unwrap();
        assert_eq!(paste.content, "durable");
        assert_eq!(paste.remaining_views(), Some(0));
    }

    #[test]
    fn ping_reaches_storage() {
        let (_dir, store) = store();
        store.ping().unwrap();
    }
}
