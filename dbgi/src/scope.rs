//! Touch tracking for lookups.
//!
//! A [`Scope`] records a touch on every node it returned data from. While a touch is live the
//! node cannot be torn down by `close`. Touches are released when the scope is closed or dropped.

use std::{cell::RefCell, marker::PhantomData, sync::Arc};

use dbgi_core::{DataSection, ParsedLayout, SectionTag};
use thread_local::ThreadLocal;

use crate::{error::Error, loaded::Loaded, map::NodeCounters};

type TouchList = Vec<Arc<NodeCounters>>;

/// Touch lists of closed scopes, kept per thread for reuse.
#[derive(Default)]
pub(crate) struct TouchListPool {
    lists: ThreadLocal<RefCell<Vec<TouchList>>>,
}

impl TouchListPool {
    fn take(&self) -> TouchList {
        self.lists.get_or_default().borrow_mut().pop().unwrap_or_default()
    }

    fn give_back(&self, list: TouchList) {
        debug_assert!(list.is_empty());
        self.lists.get_or_default().borrow_mut().push(list);
    }
}

/// The unit of touch tracking. Obtained from [`crate::DebugInfoCache::scope`].
///
/// Data returned by lookups through a scope stays valid, and its node resident, until the scope
/// is closed. A scope belongs to the thread that created it.
pub struct Scope<'c> {
    pool: &'c TouchListPool,
    touches: RefCell<TouchList>,
    _not_send: PhantomData<*const ()>,
}

impl<'c> Scope<'c> {
    pub(crate) fn new(pool: &'c TouchListPool) -> Self {
        Scope {
            pool,
            touches: RefCell::new(pool.take()),
            _not_send: PhantomData,
        }
    }

    /// Register a touch. The caller has already incremented the touch count.
    pub(crate) fn touch(&self, counters: Arc<NodeCounters>) {
        self.touches.borrow_mut().push(counters);
    }

    /// The number of touches held.
    pub fn touch_count(&self) -> usize {
        self.touches.borrow().len()
    }

    /// Release every touch taken through this scope.
    pub fn close(self) {}
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        let mut touches = std::mem::take(self.touches.get_mut());
        for counters in touches.drain(..) {
            counters
                .touch_count
                .fetch_sub(1, std::sync::atomic::Ordering::Release);
        }
        self.pool.give_back(touches);
    }
}

/// Debug info borrowed through a [`Scope`].
///
/// A view over a file that failed to load is nil: it has no sections and [`Self::error`] tells
/// why.
pub struct ParsedInfoView<'s> {
    loaded: Arc<Loaded>,
    _scope: PhantomData<&'s ()>,
}

impl<'s> ParsedInfoView<'s> {
    pub(crate) fn new(loaded: Arc<Loaded>) -> Self {
        ParsedInfoView {
            loaded,
            _scope: PhantomData,
        }
    }

    pub fn is_nil(&self) -> bool {
        self.loaded.layout().is_none()
    }

    /// Why the file produced no debug info.
    pub fn error(&self) -> Option<&Error> {
        self.loaded.error()
    }

    pub fn layout(&self) -> Option<&ParsedLayout> {
        self.loaded.layout()
    }

    pub fn sections(&self) -> &[DataSection] {
        self.loaded.sections()
    }

    /// The data of the section at `index`.
    pub fn section_data(&self, index: usize) -> Option<&[u8]> {
        let section = self.sections().get(index)?;
        let start = section.off as usize;
        let end = start + section.encoded_size as usize;
        self.loaded.data().get(start..end)
    }

    /// The data of the first section tagged `tag`.
    pub fn section(&self, tag: SectionTag) -> Option<&[u8]> {
        let (index, _) = self.layout()?.find(tag)?;
        self.section_data(index)
    }

    /// The whole container, unpacked if it had packed sections.
    pub fn raw_data(&self) -> &[u8] {
        self.loaded.data()
    }

    /// Whether the container had packed sections.
    pub fn was_unpacked(&self) -> bool {
        self.loaded.was_unpacked()
    }
}
