// eval/cache.rs — linear sample caches and the finished-raster LRU
//
// `CacheMap` holds one linear array per cache-boundary instruction, indexed
// by a caller-supplied sample index (a pixel index for raster fills). The
// arrays are shared by every accessor; each accessor writes only inside its
// own reserved `[min, max)` range, so cells are plain atomics and need no
// lock. Setup (`resize`, `set_cache_accessor`, `set_cache_available`) takes
// `&mut self` and happens between passes, before evaluators borrow the map.
//
// `RasterCache` sits one level up: it keeps whole finished rasters keyed by
// a fingerprint of the instruction list, root and raster configuration.
// Results are stored behind `Arc` so hits are a reference-count bump.

use crate::config::RasterConfig;
use crate::eval::error::CacheError;
use crate::eval::grid::GridResult;
use crate::eval::instruction::{InstrId, ParamValue};
use crate::eval::list::InstructionList;
use lru::LruCache;
use rustc_hash::FxHashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

// ── Linear sample cache ────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CacheMap {
    width: usize,
    height: usize,
    /// One cell per linear index, holding `f64` bits.
    storage: FxHashMap<InstrId, Vec<AtomicU64>>,
    /// `[accessor][instruction]`: cached values are trustworthy to read.
    available: Vec<Vec<bool>>,
    ranges: Vec<Option<Range<usize>>>,
}

impl CacheMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reallocate one `width * height` array per id in `cache_ids` and reset
    /// all accessor ranges and availability flags.
    pub fn resize(
        &mut self,
        width: usize,
        height: usize,
        num_accessors: usize,
        num_instructions: usize,
        cache_ids: &[InstrId],
    ) {
        let size = width * height;
        self.width = width;
        self.height = height;
        self.storage.clear();
        for &id in cache_ids {
            let cells = (0..size).map(|_| AtomicU64::new(f64::NAN.to_bits())).collect();
            self.storage.insert(id, cells);
        }
        self.available = vec![vec![false; num_instructions]; num_accessors];
        self.ranges = vec![None; num_accessors];
        tracing::debug!(
            width,
            height,
            accessors = num_accessors,
            arrays = cache_ids.len(),
            "resized sample cache"
        );
    }

    /// Number of linear indices per array.
    #[inline]
    pub fn size(&self) -> usize {
        self.width * self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn num_accessors(&self) -> usize {
        self.ranges.len()
    }

    /// Reserve `[min, max)` for `accessor`. The range must fit the arrays
    /// and must not overlap any other accessor's range.
    pub fn set_cache_accessor(
        &mut self,
        accessor: usize,
        min: usize,
        max: usize,
    ) -> Result<(), CacheError> {
        let count = self.ranges.len();
        if accessor >= count {
            return Err(CacheError::UnknownAccessor { accessor, count });
        }
        let size = self.size();
        if min > max || max > size {
            return Err(CacheError::RangeOutOfBounds { accessor, min, max, size });
        }
        for (other, range) in self.ranges.iter().enumerate() {
            let Some(r) = range else { continue };
            if other != accessor && min < r.end && r.start < max {
                return Err(CacheError::Overlap { accessor, other, min, max });
            }
        }
        self.ranges[accessor] = Some(min..max);
        Ok(())
    }

    pub fn accessor_range(&self, accessor: usize) -> Option<Range<usize>> {
        self.ranges.get(accessor).cloned().flatten()
    }

    /// Mark every cache boundary with id `<= up_to` readable for `accessor`.
    pub fn set_cache_available(&mut self, accessor: usize, up_to: InstrId) {
        let ids: Vec<InstrId> = self.storage.keys().copied().filter(|&id| id <= up_to).collect();
        if let Some(flags) = self.available.get_mut(accessor) {
            for id in ids {
                if let Some(f) = flags.get_mut(id as usize) {
                    *f = true;
                }
            }
        }
    }

    /// Forget every availability flag. Values stay allocated.
    pub fn reset_cache_access(&mut self) {
        for flags in &mut self.available {
            flags.iter_mut().for_each(|f| *f = false);
        }
    }

    #[inline]
    pub fn is_cached(&self, id: InstrId) -> bool {
        self.storage.contains_key(&id)
    }

    #[inline]
    pub fn is_available(&self, accessor: usize, id: InstrId) -> bool {
        self.available
            .get(accessor)
            .and_then(|flags| flags.get(id as usize))
            .copied()
            .unwrap_or(false)
    }

    #[inline]
    pub fn read(&self, id: InstrId, index: usize) -> Option<f64> {
        let cell = self.storage.get(&id)?.get(index)?;
        Some(f64::from_bits(cell.load(Ordering::Relaxed)))
    }

    #[inline]
    pub fn write(&self, id: InstrId, index: usize, value: f64) {
        if let Some(cell) = self.storage.get(&id).and_then(|cells| cells.get(index)) {
            cell.store(value.to_bits(), Ordering::Relaxed);
        }
    }
}

// ── Finished-raster cache ──────────────────────────────────────────

/// LRU of completed rasters keyed by [`fingerprint`].
pub struct RasterCache {
    rasters: Mutex<LruCache<u64, Arc<GridResult>>>,
}

impl RasterCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { rasters: Mutex::new(LruCache::new(cap)) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<u64, Arc<GridResult>>> {
        self.rasters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: u64) -> Option<Arc<GridResult>> {
        self.lock().get(&key).cloned()
    }

    pub fn put(&self, key: u64, result: Arc<GridResult>) {
        self.lock().put(key, result);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deterministic hash of every instruction, the root and the raster
/// parameters. Same graph and config give the same key.
pub fn fingerprint(list: &InstructionList, root: InstrId, config: &RasterConfig) -> u64 {
    let mut hasher = DefaultHasher::new();

    list.len().hash(&mut hasher);
    for ins in list.iter() {
        ins.opcode.index().hash(&mut hasher);
        ins.params.len().hash(&mut hasher);
        for p in &ins.params {
            p.is_reference.hash(&mut hasher);
            match p.value {
                ParamValue::Float(v) => (0u8, v.to_bits()).hash(&mut hasher),
                ParamValue::Int(v) => (1u8, v as u64).hash(&mut hasher),
                ParamValue::UInt(v) => (2u8, v).hash(&mut hasher),
            }
        }
    }
    root.hash(&mut hasher);

    config.width.hash(&mut hasher);
    config.height.hash(&mut hasher);
    for v in [config.x_min, config.x_max, config.y_min, config.y_max] {
        v.to_bits().hash(&mut hasher);
    }
    config.z.map(f64::to_bits).hash(&mut hasher);

    hasher.finish()
}
