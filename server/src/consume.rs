use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use ttlpaste_common::PasteView;

use crate::store::{PasteStore, StoreError};

/// Reads a paste and enforces its expiry and view limit, counting the read
/// against the limit.
///
/// `Ok(None)` means the paste is unavailable: it never existed, it expired,
/// or its views ran out. Callers must not tell these apart. Store failures
/// are returned as errors and never retried.
///
/// Expiry is judged on the snapshot read before any decrement, so reading
/// an expired paste leaves its view budget alone. Losing the decrement to a
/// concurrent reader is treated exactly like finding the paste exhausted.
#[instrument(skip(store), err)]
pub fn fetch<S>(store: &S, id: &str, now: DateTime<Utc>) -> Result<Option<PasteView>, StoreError>
where
    S: PasteStore + ?Sized,
{
    let paste = match store.lookup(id)? {
        Some(paste) => paste,
        None => return Ok(None),
    };

    if paste.expired(now) {
        debug!("paste expired");
        return Ok(None);
    }

    let remaining_views = match paste.remaining_views {
        None => {
            return Ok(Some(PasteView {
                content: paste.content,
                remaining_views: None,
                expires_at: paste.expires_at,
            }))
        }
        Some(0) => {
            debug!("paste exhausted");
            return Ok(None);
        }
        Some(_) => match store.conditional_decrement(id)? {
            Some(updated) => updated.remaining_views,
            None => {
                debug!("lost decrement race");
                return Ok(None);
            }
        },
    };

    Ok(Some(PasteView {
        content: paste.content,
        remaining_views,
        expires_at: paste.expires_at,
    }))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::paste::Paste;
    use crate::store::{temp_store, unopenable_store};

    fn epoch_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn hello_with_two_views() {
        let (store, _dir) = temp_store();
        store.create("abc", "hello".to_string(), None, Some(2)).unwrap();
        let now = Utc::now();

        let first = fetch(&store, "abc", now).unwrap().unwrap();
        assert_eq!(first.content, "hello");
        assert_eq!(first.remaining_views, Some(1));
        assert_eq!(first.expires_at, None);

        let second = fetch(&store, "abc", now).unwrap().unwrap();
        assert_eq!(second.content, "hello");
        assert_eq!(second.remaining_views, Some(0));

        assert_eq!(fetch(&store, "abc", now).unwrap(), None);
    }

    #[test]
    fn exactly_max_views_reads_succeed() {
        const MAX: u32 = 5;
        let (store, _dir) = temp_store();
        store.create("abc", "x".to_string(), None, Some(MAX)).unwrap();
        let now = Utc::now();

        for expected in (0..MAX).rev() {
            let view = fetch(&store, "abc", now).unwrap().expect("view should remain");
            assert_eq!(view.remaining_views, Some(expected));
        }
        for _ in 0..3 {
            assert_eq!(fetch(&store, "abc", now).unwrap(), None);
        }
        assert_eq!(store.lookup("abc").unwrap().unwrap().remaining_views, Some(0));
    }

    #[test]
    fn concurrent_reads_of_single_view_paste_yield_one_winner() {
        const READERS: usize = 12;
        let (store, _dir) = temp_store();
        store.create("abc", "secret".to_string(), None, Some(1)).unwrap();

        let store = Arc::new(store);
        let barrier = Arc::new(Barrier::new(READERS));
        let now = Utc::now();
        let handles: Vec<_> = (0..READERS)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    fetch(&*store, "abc", now).expect("fetch should not fail")
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("reader thread panicked"))
            .collect();
        let winners: Vec<_> = results.iter().flatten().collect();

        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].content, "secret");
        assert_eq!(winners[0].remaining_views, Some(0));
        assert_eq!(results.iter().filter(|r| r.is_none()).count(), READERS - 1);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let (store, _dir) = temp_store();
        let expires = epoch_ms(1_700_000_060_000);
        store
            .create("abc", "x".to_string(), Some(expires), None)
            .unwrap();

        let view = fetch(&store, "abc", expires - Duration::milliseconds(1))
            .unwrap()
            .expect("paste should still be readable");
        assert_eq!(view.expires_at, Some(expires));

        assert_eq!(fetch(&store, "abc", expires).unwrap(), None);
        assert_eq!(
            fetch(&store, "abc", expires + Duration::seconds(1)).unwrap(),
            None
        );
    }

    #[test]
    fn expired_read_does_not_consume_views() {
        let (store, _dir) = temp_store();
        let expires = epoch_ms(1_700_000_060_000);
        store
            .create("abc", "x".to_string(), Some(expires), Some(3))
            .unwrap();

        for _ in 0..5 {
            assert_eq!(fetch(&store, "abc", expires).unwrap(), None);
        }
        assert_eq!(store.lookup("abc").unwrap().unwrap().remaining_views, Some(3));

        let view = fetch(&store, "abc", expires - Duration::seconds(30))
            .unwrap()
            .unwrap();
        assert_eq!(view.remaining_views, Some(2));
    }

    #[test]
    fn unlimited_paste_is_never_decremented() {
        let (store, _dir) = temp_store();
        store.create("abc", "forever".to_string(), None, None).unwrap();
        let now = Utc::now();

        for _ in 0..50 {
            let view = fetch(&store, "abc", now).unwrap().unwrap();
            assert_eq!(view.content, "forever");
            assert_eq!(view.remaining_views, None);
        }
        assert_eq!(store.lookup("abc").unwrap().unwrap().remaining_views, None);
    }

    #[test]
    fn unknown_id_is_unavailable() {
        let (store, _dir) = temp_store();
        assert_eq!(fetch(&store, "nope", Utc::now()).unwrap(), None);
    }

    /// Store that serves a fixed row and scripts the decrement outcome.
    struct Scripted {
        paste: Option<Paste>,
        decrement: Option<Paste>,
        fail: bool,
        decrements: Cell<usize>,
    }

    impl Scripted {
        fn new(paste: Option<Paste>) -> Self {
            Self {
                paste,
                decrement: None,
                fail: false,
                decrements: Cell::new(0),
            }
        }

        fn offline() -> StoreError {
            StoreError::Codec(Box::new(bincode::ErrorKind::Custom("offline".to_string())))
        }
    }

    impl PasteStore for Scripted {
        fn create(
            &self,
            _id: &str,
            _content: String,
            _expires_at: Option<DateTime<Utc>>,
            _max_views: Option<u32>,
        ) -> Result<Paste, StoreError> {
            unreachable!("fetch never creates")
        }

        fn lookup(&self, _id: &str) -> Result<Option<Paste>, StoreError> {
            if self.fail {
                return Err(Self::offline());
            }
            Ok(self.paste.clone())
        }

        fn conditional_decrement(&self, _id: &str) -> Result<Option<Paste>, StoreError> {
            self.decrements.set(self.decrements.get() + 1);
            Ok(self.decrement.clone())
        }

        fn health_check(&self) -> bool {
            !self.fail
        }
    }

    fn limited(remaining: u32) -> Paste {
        let mut paste = Paste::new("abc", "x".to_string(), epoch_ms(0), None, Some(5));
        paste.remaining_views = Some(remaining);
        paste
    }

    #[test]
    fn exhausted_paste_skips_the_decrement() {
        let store = Scripted::new(Some(limited(0)));
        assert_eq!(fetch(&store, "abc", epoch_ms(1)).unwrap(), None);
        assert_eq!(store.decrements.get(), 0);
    }

    #[test]
    fn expired_paste_skips_the_decrement() {
        let mut paste = limited(2);
        paste.expires_at = Some(epoch_ms(10));
        let store = Scripted::new(Some(paste));

        assert_eq!(fetch(&store, "abc", epoch_ms(10)).unwrap(), None);
        assert_eq!(store.decrements.get(), 0);
    }

    #[test]
    fn refused_decrement_is_unavailable() {
        let store = Scripted::new(Some(limited(1)));
        assert_eq!(fetch(&store, "abc", epoch_ms(1)).unwrap(), None);
        assert_eq!(store.decrements.get(), 1);
    }

    #[test]
    fn count_comes_from_the_decremented_row() {
        let mut store = Scripted::new(Some(limited(4)));
        store.decrement = Some(limited(1));

        let view = fetch(&store, "abc", epoch_ms(1)).unwrap().unwrap();
        assert_eq!(view.remaining_views, Some(1));
        assert_eq!(store.decrements.get(), 1);
    }

    #[test]
    fn undecodable_row_is_an_error_not_unavailable() {
        let mut store = Scripted::new(Some(limited(1)));
        store.fail = true;

        assert!(matches!(
            fetch(&store, "abc", epoch_ms(1)),
            Err(StoreError::Codec(_))
        ));
        assert_eq!(store.decrements.get(), 0);
    }

    #[test]
    fn backend_failure_is_an_error_not_unavailable() {
        let (store, _dir) = unopenable_store();

        assert!(matches!(
            fetch(&store, "abc", Utc::now()),
            Err(StoreError::Unavailable(_))
        ));
    }
}
