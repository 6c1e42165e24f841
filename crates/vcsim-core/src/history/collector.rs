//! Paginated, filtered cursor over a history log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::fault::Fault;
use crate::history::log::HistoryLog;
use crate::reference::ObjectReference;

/// Largest page a collector accepts.
pub const MAX_PAGE_SIZE: usize = 1000;

type ItemFilter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

struct Cursor {
    position: u64,
    page_size: usize,
}

/// A client's view over a history log.
///
/// The cursor starts at the oldest retained item. Reads return items in
/// chronological order and move the cursor; reading past either end
/// returns a short or empty page rather than failing.
pub struct HistoryCollector<T> {
    reference: ObjectReference,
    log: Arc<HistoryLog<T>>,
    filter: ItemFilter<T>,
    cursor: Mutex<Cursor>,
    destroyed: AtomicBool,
}

impl<T: Clone> HistoryCollector<T> {
    pub(crate) fn new(
        reference: ObjectReference,
        log: Arc<HistoryLog<T>>,
        filter: ItemFilter<T>,
        page_size: usize,
    ) -> Self {
        let (first, _) = log.bounds();
        Self {
            reference,
            log,
            filter,
            cursor: Mutex::new(Cursor {
                position: first,
                page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            }),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Reference of the collector's registry object.
    #[must_use]
    pub const fn reference(&self) -> &ObjectReference {
        &self.reference
    }

    /// Returns true when the collector accepts `item`.
    pub fn matches(&self, item: &T) -> bool {
        (self.filter)(item)
    }

    fn lock(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_live(&self) -> Result<(), Fault> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Fault::not_found(&self.reference));
        }
        Ok(())
    }

    /// Reads up to `max_count` items after the cursor.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero count, `NotFound` once destroyed.
    pub fn read_next(&self, max_count: usize) -> Result<Vec<T>, Fault> {
        self.ensure_live()?;
        if max_count == 0 {
            return Err(Fault::invalid_argument("maxCount", "must be positive"));
        }
        let mut cursor = self.lock();
        let (items, position) = self.log.scan_forward(cursor.position, max_count, |item| self.matches(item));
        cursor.position = position;
        Ok(items)
    }

    /// Reads up to `max_count` items before the cursor, oldest first.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero count, `NotFound` once destroyed.
    pub fn read_prev(&self, max_count: usize) -> Result<Vec<T>, Fault> {
        self.ensure_live()?;
        if max_count == 0 {
            return Err(Fault::invalid_argument("maxCount", "must be positive"));
        }
        let mut cursor = self.lock();
        let (items, position) = self.log.scan_backward(cursor.position, max_count, |item| self.matches(item));
        cursor.position = position;
        Ok(items)
    }

    /// Moves the cursor past the newest item.
    ///
    /// # Errors
    ///
    /// `NotFound` once destroyed.
    pub fn reset_to_latest(&self) -> Result<(), Fault> {
        self.ensure_live()?;
        let (_, next) = self.log.bounds();
        self.lock().position = next;
        Ok(())
    }

    /// Moves the cursor to the oldest retained item.
    ///
    /// # Errors
    ///
    /// `NotFound` once destroyed.
    pub fn rewind(&self) -> Result<(), Fault> {
        self.ensure_live()?;
        let (first, _) = self.log.bounds();
        self.lock().position = first;
        Ok(())
    }

    /// Current `latestPage` size.
    pub fn page_size(&self) -> usize {
        self.lock().page_size
    }

    /// Changes the `latestPage` size.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` outside `1..=MAX_PAGE_SIZE`, `NotFound` once destroyed.
    pub fn set_page_size(&self, page_size: usize) -> Result<(), Fault> {
        self.ensure_live()?;
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(Fault::invalid_argument(
                "maxCount",
                format!("page size must be between 1 and {MAX_PAGE_SIZE}"),
            ));
        }
        self.lock().page_size = page_size;
        Ok(())
    }

    /// The newest `page_size` matching items, oldest first.
    pub fn latest_page(&self) -> Vec<T> {
        let page_size = self.page_size();
        let (_, next) = self.log.bounds();
        self.log
            .scan_backward(next, page_size, |item| self.matches(item))
            .0
    }

    /// Blocks until matching items arrive after the cursor and returns them.
    ///
    /// Returns an empty list when `max_wait` elapses first.
    ///
    /// # Errors
    ///
    /// `Cancelled` when the collector is destroyed while waiting.
    pub fn wait_for_new(&self, max_wait: Option<Duration>) -> Result<Vec<T>, Fault> {
        let deadline = max_wait.map(|wait| Instant::now() + wait);
        loop {
            let items = match self.read_next(usize::MAX) {
                Err(_) if self.is_destroyed() => return Err(Fault::Cancelled),
                read => read?,
            };
            if !items.is_empty() {
                return Ok(items);
            }
            let position = self.lock().position;
            let available = self
                .log
                .wait_beyond(position, deadline, || self.is_destroyed());
            if !available {
                return if self.is_destroyed() {
                    Err(Fault::Cancelled)
                } else {
                    Ok(Vec::new())
                };
            }
        }
    }

    /// Marks the collector destroyed and wakes blocked readers.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.log.wake_all();
    }

    /// Returns true once destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}
