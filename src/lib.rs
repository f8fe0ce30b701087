/*!
KVLite — a partition-based key/value cache persisted in a SQL relational
database, with an equivalent in-process engine for deployments that don't
want one.

Three expiration policies ([`entry::ExpirationPolicy`]) govern each entry:
absolute (`Timed`), sliding (`Sliding`), and deployment-wide (`Static`);
entries may reference up to [`entry::MAX_PARENT_KEY_COUNT`] parents, and
deleting a parent cascades to every descendant. Both
[`engine::db::DbCacheEngine`] and [`engine::memory::MemoryCacheEngine`]
implement the same [`engine::CacheEngine`] contract, composed from pluggable
capability objects ([`clock::Clock`], [`random::RandomSource`],
[`hash::KeyHasher`], [`serializer::ValueSerializer`],
[`compressor::Compressor`]) rather than an inheritance hierarchy.

```no_run
use kvlite::engine::memory::MemoryCacheEngine;
use kvlite::engine::CacheEngine;
use kvlite::settings::Settings;

# async fn run() -> kvlite::error::Result<()> {
let engine = MemoryCacheEngine::new(Settings::default());
engine.add_static(Some("sessions"), "user-42", &"active", &[]).await?;
let value: Option<String> = engine.get(Some("sessions"), "user-42").await?;
assert_eq!(value.as_deref(), Some("active"));
# Ok(())
# }
```
*/

pub mod clock;
pub mod compressor;
pub mod connection;
pub mod dialect;
pub mod engine;
pub mod entry;
pub mod enumerable;
pub mod error;
pub mod executor;
pub mod hash;
pub mod random;
pub mod serializer;
pub mod settings;

pub use clock::Clock;
pub use compressor::Compressor;
pub use connection::ConnectionFactory;
pub use engine::CacheEngine;
pub use entry::{CacheEntry, CacheValue, CountMode, ExpirationPolicy, ParentRef};
pub use enumerable::CachingEnumerable;
pub use error::{Error, Result};
pub use executor::FireAndForgetExecutor;
pub use hash::KeyHasher;
pub use random::RandomSource;
pub use serializer::ValueSerializer;
pub use settings::{Settings, SettingsHandle};
