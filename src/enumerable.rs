/*!
C11 — a lazy, paged, non-restartable sequence over a cache partition's
visible entries (spec §2's component table, §4.1's `GetItems`/`PeekItems`).

Grounded on the teacher's `key_order`/`value_order`/`iter_order` iteration
helpers (`stores.rs`, `stores/timed_sized.rs`): those wrap an in-memory
structure's contents as a plain iterator; this generalizes the same idea to
a paged fetch from a [`CacheEngine`], since entries live behind the engine's
`get_items`/`peek_items` rather than a bare map.
*/

use crate::engine::CacheEngine;
use crate::error::Result;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;

/// Whether a [`CachingEnumerable`] bumps sliding/static expiry as it reads
/// (mirrors the `Get`/`Peek` distinction on the engine itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Bumping,
    NonBumping,
}

/// A finite, forward-only sequence over one partition's visible entries.
///
/// The underlying engine has no true cursor-based pagination (`GetItems`
/// returns its whole visible set per call), so this buffers that set in
/// `page_size`-sized chunks on first use rather than issuing one round trip
/// per item. Once the buffer is drained the sequence is exhausted — calling
/// `next` again always yields `None`; there is no way to restart it at the
/// same snapshot, matching spec §4.1's "non-restartable" requirement.
pub struct CachingEnumerable<'e, T, E> {
    engine: &'e E,
    partition: Option<String>,
    page_size: usize,
    mode: ReadMode,
    buffer: VecDeque<T>,
    exhausted: bool,
}

impl<'e, T, E> CachingEnumerable<'e, T, E>
where
    T: DeserializeOwned + Send,
    E: CacheEngine,
{
    /// `page_size` only controls how many items this sequence buffers per
    /// internal refill; it does not change how many rows are visible.
    pub fn new(engine: &'e E, partition: Option<&str>, page_size: usize, mode: ReadMode) -> Self {
        CachingEnumerable {
            engine,
            partition: partition.map(|p| p.to_string()),
            page_size: page_size.max(1),
            mode,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// The next item, or `None` once the sequence is exhausted.
    pub async fn next(&mut self) -> Result<Option<T>> {
        if let Some(item) = self.buffer.pop_front() {
            return Ok(Some(item));
        }
        if self.exhausted {
            return Ok(None);
        }
        self.refill().await?;
        Ok(self.buffer.pop_front())
    }

    /// Drains up to `page_size` items at once (spec's "paged" requirement
    /// made explicit for callers that want whole pages rather than one item
    /// at a time).
    pub async fn next_page(&mut self) -> Result<Vec<T>> {
        let mut page = Vec::with_capacity(self.page_size);
        while page.len() < self.page_size {
            match self.next().await? {
                Some(item) => page.push(item),
                None => break,
            }
        }
        Ok(page)
    }

    async fn refill(&mut self) -> Result<()> {
        let items: Vec<T> = match self.mode {
            ReadMode::Bumping => self.engine.get_items(self.partition.as_deref()).await?,
            ReadMode::NonBumping => self.engine.peek_items(self.partition.as_deref()).await?,
        };
        self.exhausted = true;
        self.buffer.extend(items);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::engine::memory::MemoryCacheEngine;
    use crate::settings::Settings;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct Widget {
        name: String,
    }

    #[tokio::test]
    async fn drains_every_visible_entry_exactly_once() {
        let clock = Arc::new(FixedClock::new(1_000));
        let engine = MemoryCacheEngine::builder(Settings::default())
            .with_clock(clock)
            .build();
        for i in 0..5 {
            let w = Widget { name: format!("w{i}") };
            engine
                .add_static(Some("p"), &format!("k{i}"), &w, &[])
                .await
                .unwrap();
        }

        let mut seq: CachingEnumerable<Widget, _> =
            CachingEnumerable::new(&engine, Some("p"), 2, ReadMode::NonBumping);
        let mut seen = Vec::new();
        while let Some(item) = seq.next().await.unwrap() {
            seen.push(item);
        }
        assert_eq!(seen.len(), 5);

        // exhausted: further calls yield None, not a restart
        assert_eq!(seq.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn next_page_batches_up_to_page_size() {
        let clock = Arc::new(FixedClock::new(1_000));
        let engine = MemoryCacheEngine::builder(Settings::default())
            .with_clock(clock)
            .build();
        for i in 0..3 {
            let w = Widget { name: format!("w{i}") };
            engine
                .add_static(Some("p"), &format!("k{i}"), &w, &[])
                .await
                .unwrap();
        }
        let mut seq: CachingEnumerable<Widget, _> =
            CachingEnumerable::new(&engine, Some("p"), 2, ReadMode::NonBumping);
        let first_page = seq.next_page().await.unwrap();
        assert_eq!(first_page.len(), 2);
        let second_page = seq.next_page().await.unwrap();
        assert_eq!(second_page.len(), 1);
        let third_page = seq.next_page().await.unwrap();
        assert!(third_page.is_empty());
    }
}
