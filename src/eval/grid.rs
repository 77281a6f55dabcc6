// eval/grid.rs — raster fills with rayon parallelism
//
// A raster is split into contiguous row bands, one per accessor. Each band
// runs on its own thread with its own `Evaluator`; the instruction list and
// the sample cache are shared read-only. Linear sample index is
// `row * width + col`, so a band's cache range is exactly its pixels.
//
// `RasterSession` keeps the sample cache alive across passes over the same
// window. After each pass every cache boundary the pass computed is marked
// readable, so later passes (another root of the same graph, typically) read
// those values instead of recomputing their sub-graphs.

use crate::config::RasterConfig;
use crate::eval::cache::{fingerprint, CacheMap, RasterCache};
use crate::eval::compiled::{InstructionTree, Rid};
use crate::eval::coordinate::Coordinate;
use crate::eval::error::GraphError;
use crate::eval::evaluator::Evaluator;
use crate::eval::instruction::InstrId;
use crate::eval::list::InstructionList;
use rayon::prelude::*;
use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

/// Row-major raster of root values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridResult {
    /// Length = width × height.
    pub values: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub min_value: f32,
    pub max_value: f32,
}

impl GridResult {
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            values: vec![0.0; width * height],
            width: width as u32,
            height: height as u32,
            min_value: 0.0,
            max_value: 0.0,
        }
    }

    #[inline]
    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.width as usize {
            return None;
        }
        self.values.get(row * self.width as usize + col).copied()
    }
}

/// Rows owned by `accessor` when `height` rows are split `count` ways.
pub fn band(height: usize, count: usize, accessor: usize) -> Range<usize> {
    let count = count.max(1);
    (height * accessor / count)..(height * (accessor + 1) / count)
}

/// One-shot fill of `root` over the window in `config`.
pub fn evaluate_grid(
    list: &mut InstructionList,
    root: InstrId,
    config: &RasterConfig,
) -> Result<GridResult, GraphError> {
    RasterSession::new(config.clone())?.fill(list, root)
}

/// Sample cache and configuration shared by consecutive fills.
pub struct RasterSession {
    config: RasterConfig,
    cache: CacheMap,
    sized_for: Option<usize>,
    results: Option<Arc<RasterCache>>,
    passes: usize,
}

impl RasterSession {
    pub fn new(config: RasterConfig) -> Result<Self, GraphError> {
        config.validate()?;
        Ok(Self { config, cache: CacheMap::new(), sized_for: None, results: None, passes: 0 })
    }

    /// Reuse finished rasters from `results` when the fingerprint matches.
    pub fn with_result_cache(mut self, results: Arc<RasterCache>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn config(&self) -> &RasterConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheMap {
        &self.cache
    }

    /// Passes actually evaluated (result-cache hits excluded).
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Evaluate `root` at every pixel of the window.
    pub fn fill(&mut self, list: &mut InstructionList, root: InstrId) -> Result<GridResult, GraphError> {
        let key = fingerprint(list, root, &self.config);
        if let Some(hit) = self.results.as_ref().and_then(|r| r.get(key)) {
            tracing::debug!(root, key, "raster result cache hit");
            return Ok((*hit).clone());
        }

        let tree = list.get_tree(root)?;
        let list: &InstructionList = list;
        if self.config.use_cache {
            self.prepare_cache(list)?;
        }

        let started = Instant::now();
        let result = self.run_pass(list, &tree)?;
        self.passes += 1;
        tracing::info!(
            root,
            width = self.config.width,
            height = self.config.height,
            accessors = self.config.effective_accessors(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "filled raster"
        );

        if self.config.use_cache {
            self.mark_computed(list, &tree);
        }
        if let Some(results) = &self.results {
            results.put(key, Arc::new(result.clone()));
        }
        Ok(result)
    }

    fn prepare_cache(&mut self, list: &InstructionList) -> Result<(), GraphError> {
        if self.sized_for == Some(list.len()) {
            return Ok(());
        }
        let (w, h) = (self.config.width, self.config.height);
        let accessors = self.config.effective_accessors();
        self.cache.resize(w, h, accessors, list.len(), list.cache_boundaries());
        for a in 0..accessors {
            let rows = band(h, accessors, a);
            self.cache.set_cache_accessor(a, rows.start * w, rows.end * w)?;
        }
        self.sized_for = Some(list.len());
        Ok(())
    }

    fn run_pass(&self, list: &InstructionList, tree: &Arc<InstructionTree>) -> Result<GridResult, GraphError> {
        let config = &self.config;
        let (w, h) = (config.width, config.height);
        let accessors = config.effective_accessors();
        let cache = config.use_cache.then_some(&self.cache);

        // Each band gets its own evaluator; arena and perm tables are per
        // thread so there is no contention.
        let bands: Vec<(Vec<f32>, f32, f32)> = (0..accessors)
            .into_par_iter()
            .map(|a| -> Result<_, GraphError> {
                let mut ev = Evaluator::new(list, Arc::clone(tree));
                if let Some(map) = cache {
                    ev.bind_cache(map, a)?;
                }
                let rows = band(h, accessors, a);
                let mut out = Vec::with_capacity(rows.len() * w);
                let mut lo = f32::MAX;
                let mut hi = f32::MIN;
                for row in rows {
                    for col in 0..w {
                        let (x, y) = config.sample_position(col, row);
                        let coord = match config.z {
                            Some(z) => Coordinate::new3(x, y, z),
                            None => Coordinate::new2(x, y),
                        };
                        let v = ev.evaluate(coord) as f32;
                        lo = lo.min(v);
                        hi = hi.max(v);
                        out.push(v);
                    }
                }
                Ok((out, lo, hi))
            })
            .collect::<Result<_, _>>()?;

        let mut values = Vec::with_capacity(w * h);
        let mut min_value = f32::MAX;
        let mut max_value = f32::MIN;
        for (band, lo, hi) in bands {
            min_value = min_value.min(lo);
            max_value = max_value.max(hi);
            values.extend(band);
        }

        Ok(GridResult { values, width: w as u32, height: h as u32, min_value, max_value })
    }

    /// Mark readable every boundary up to the longest prefix of the list's
    /// boundaries that this tree computed. Boundaries are valued in the
    /// sample frame, so whatever frame reached them here, the stored values
    /// are what any later tree would compute.
    fn mark_computed(&mut self, list: &InstructionList, tree: &InstructionTree) {
        let computed = |id: InstrId| tree.sequence_by_rid(Rid::Boundary(id)).is_some();
        let up_to = list.cache_boundaries().iter().copied().take_while(|&id| computed(id)).last();
        if let Some(up_to) = up_to {
            for a in 0..self.cache.num_accessors() {
                self.cache.set_cache_available(a, up_to);
            }
            tracing::debug!(up_to, "cache boundaries readable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::error::ConfigError;
    use crate::eval::instruction::InstructionParam as P;
    use crate::eval::opcode::Opcode;

    fn config(width: usize, height: usize, accessors: usize) -> RasterConfig {
        RasterConfig {
            width,
            height,
            x_min: 0.0,
            x_max: width as f64,
            y_min: 0.0,
            y_max: height as f64,
            accessors,
            ..Default::default()
        }
    }

    #[test]
    fn constant_grid() {
        let mut list = InstructionList::new();
        let c = list.push(Opcode::Constant, [P::float(42.0)]);
        let result = evaluate_grid(&mut list, c, &config(4, 4, 2)).unwrap();
        assert_eq!(result.values.len(), 16);
        assert!(result.values.iter().all(|&v| v == 42.0));
        assert_eq!(result.min_value, 42.0);
        assert_eq!(result.max_value, 42.0);
    }

    #[test]
    fn axis_grid_is_row_major() {
        let mut list = InstructionList::new();
        let x = list.push(Opcode::X, []);
        let y = list.push(Opcode::Y, []);
        let ten = list.push(Opcode::Multiply, [P::source(y), P::float(10.0)]);
        let root = list.push(Opcode::Add, [P::source(x), P::source(ten)]);
        let result = evaluate_grid(&mut list, root, &config(3, 2, 2)).unwrap();
        assert_eq!(result.get(0, 0), Some(5.5));
        assert_eq!(result.get(2, 0), Some(7.5));
        assert_eq!(result.get(1, 1), Some(16.5));
        assert_eq!(result.get(3, 0), None);
    }

    #[test]
    fn bands_cover_every_row_once() {
        let rows: Vec<usize> = (0..3).flat_map(|a| band(10, 3, a)).collect();
        assert_eq!(rows, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn cached_and_uncached_fills_agree() {
        let mut list = InstructionList::new();
        let n = list.push(Opcode::GradientBasis, [P::int(3), P::uint(9)]);
        let c = list.push(Opcode::CacheArray, [P::source(n)]);
        let s = list.push(Opcode::ScaleDomain, [P::source(c), P::float(0.5)]);
        let root = list.push(Opcode::Add, [P::source(c), P::source(s)]);

        let cached = evaluate_grid(&mut list, root, &config(8, 8, 3)).unwrap();
        let plain = evaluate_grid(&mut list, root, &RasterConfig { use_cache: false, ..config(8, 8, 3) }).unwrap();
        assert_eq!(cached.values, plain.values);
    }

    #[test]
    fn second_pass_reads_boundaries() {
        let mut list = InstructionList::new();
        let x = list.push(Opcode::X, []);
        let c = list.push(Opcode::CacheArray, [P::source(x)]);
        let a = list.push(Opcode::Abs, [P::source(c)]);
        let b = list.push(Opcode::Multiply, [P::source(c), P::float(2.0)]);

        let mut session = RasterSession::new(config(4, 2, 2)).unwrap();
        let first = session.fill(&mut list, a).unwrap();
        assert!(session.cache().is_available(0, c));
        let second = session.fill(&mut list, b).unwrap();
        for (u, v) in first.values.iter().zip(&second.values) {
            assert_eq!(*v, u * 2.0);
        }
        assert_eq!(session.passes(), 2);
    }

    #[test]
    fn result_cache_skips_repeat_fills() {
        let mut list = InstructionList::new();
        let x = list.push(Opcode::X, []);
        let results = Arc::new(RasterCache::new(4));
        let mut session = RasterSession::new(config(2, 2, 1)).unwrap().with_result_cache(Arc::clone(&results));
        let a = session.fill(&mut list, x).unwrap();
        let b = session.fill(&mut list, x).unwrap();
        assert_eq!(a, b);
        assert_eq!(session.passes(), 1);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(matches!(
            RasterSession::new(RasterConfig { height: 0, ..Default::default() }),
            Err(GraphError::Config(ConfigError::EmptyRaster { height: 0, .. }))
        ));
    }
}
