use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use parking_lot::{Mutex, MutexGuard};

pub trait PoolItem: Send + 'static {
    type Format: Clone + PartialEq + fmt::Debug + Send + 'static;

    fn format(&self) -> &Self::Format;
}

type Factory<T> = dyn Fn(&<T as PoolItem>::Format) -> T + Send + Sync;

pub struct Pool<T: PoolItem> {
    shared: Arc<Shared<T>>,
}

struct Shared<T: PoolItem> {
    size: usize,
    factory: Box<Factory<T>>,
    state: Mutex<State<T>>,
}

struct State<T: PoolItem> {
    format: T::Format,
    free: Vec<(usize, T)>,
    borrowed: Vec<bool>,
}

impl<T: PoolItem> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: PoolItem> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Pool")
            .field("size", &self.shared.size)
            .field("available", &state.free.len())
            .field("format", &state.format)
            .finish()
    }
}

impl<T: PoolItem> Pool<T> {
    pub fn new<F>(size: usize, format: T::Format, factory: F) -> Self
    where
        F: Fn(&T::Format) -> T + Send + Sync + 'static,
    {
        // Reversed so slot 0 is handed out first.
        let free = (0..size).rev().map(|slot| (slot, factory(&format))).collect();

        Self {
            shared: Arc::new(Shared {
                size,
                factory: Box::new(factory),
                state: Mutex::new(State {
                    format,
                    free,
                    borrowed: vec![false; size],
                }),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    pub fn available(&self) -> usize {
        self.shared.state.lock().free.len()
    }

    pub fn borrowed(&self) -> usize {
        self.shared.size - self.available()
    }

    pub fn format(&self) -> T::Format {
        self.shared.state.lock().format.clone()
    }

    /// Switch the pool to `format`. Free items that no longer match are
    /// reallocated now; borrowed ones are replaced when they come back.
    pub fn set_format(&self, format: T::Format) {
        let mut state = self.shared.state.lock();
        if state.format == format {
            return;
        }

        log::debug!("reallocating pool of {} for {format:?}", self.shared.size);
        for (_, item) in state.free.iter_mut() {
            if item.format() != &format {
                *item = (self.shared.factory)(&format);
            }
        }
        state.format = format;
    }

    pub fn acquire(&self) -> Option<Pooled<T>> {
        let mut state = self.shared.state.lock();
        let (slot, item) = state.free.pop()?;
        debug_assert!(!state.borrowed[slot], "pool slot {slot} handed out twice");
        state.borrowed[slot] = true;

        Some(Pooled {
            slot,
            item: Some(item),
            pool: Arc::clone(&self.shared),
        })
    }

    pub fn release(&self, item: Pooled<T>) {
        debug_assert!(
            Arc::ptr_eq(&self.shared, &item.pool),
            "item released into a pool it was not acquired from"
        );
        drop(item);
    }
}

impl<T: PoolItem> Shared<T> {
    fn give_back(&self, slot: usize, mut item: T) {
        let mut state = self.state.lock();
        // Reallocate unlocked so a concurrent acquire is not held up.
        while item.format() != &state.format {
            let format = state.format.clone();
            item = MutexGuard::unlocked(&mut state, || (self.factory)(&format));
        }

        debug_assert!(
            state.borrowed.get(slot).copied().unwrap_or(false),
            "pool slot {slot} released twice"
        );
        if let Some(flag) = state.borrowed.get_mut(slot) {
            *flag = false;
        }
        state.free.push((slot, item));
    }
}

pub struct Pooled<T: PoolItem> {
    slot: usize,
    item: Option<T>,
    pool: Arc<Shared<T>>,
}

impl<T: PoolItem> Pooled<T> {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<T: PoolItem> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pooled item present until dropped")
    }
}

impl<T: PoolItem> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled item present until dropped")
    }
}

impl<T: PoolItem> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(self.slot, item);
        }
    }
}

impl<T: PoolItem + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("slot", &self.slot)
            .field("item", &self.item)
            .finish()
    }
}
