//! In-memory bitmap cache with LRU-within-priority eviction.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};
use vellum_camera::{Point, Rect};
use vellum_provider::SharedBitmap;
use vellum_tiles::{TileCoordinate, TileKey};

use crate::pressure::MemoryPressure;
use crate::priority::{PriorityContext, PriorityZone};

/// Cache key: document identity plus tile identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    document: String,
    tile: TileKey,
}

/// One cached tile.
#[derive(Debug, Clone)]
pub struct TileCacheEntry {
    pub coordinate: TileCoordinate,
    pub bitmap: SharedBitmap,
    pub epoch: u64,
    pub last_access: u64,
    pub zone: PriorityZone,
}

/// A fallback lookup result.
///
/// `fallback_tile` is the *cached* tile's coordinate; the displayer must
/// position the bitmap by it, never by the tile it asked for.
#[derive(Debug, Clone)]
pub struct FallbackBitmap {
    pub bitmap: SharedBitmap,
    pub css_stretch: f64,
    pub fallback_tile: TileCoordinate,
    pub epoch: u64,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub tile_count: usize,
    pub bytes_used: usize,
    pub byte_budget: usize,
    pub hits: u64,
    pub misses: u64,
    pub fallback_hits: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn utilization(&self) -> f64 {
        if self.byte_budget == 0 {
            0.0
        } else {
            self.bytes_used as f64 / self.byte_budget as f64
        }
    }
}

/// Unclipped page-local footprint of a tile.
fn tile_rect(tile: &TileCoordinate) -> Rect {
    let ts = tile.tile_size as f64;
    Rect::new(tile.tile_x as f64 * ts, tile.tile_y as f64 * ts, ts, ts)
}

fn tile_center(tile: &TileCoordinate) -> Point {
    tile_rect(tile).center()
}

/// L1 bitmap cache keyed by `(document, page, tile_x, tile_y, scale)`.
///
/// Owned by the main context; no interior locking. Eviction removes the
/// least protected zone first and the oldest access within a zone, so a
/// burst of low-priority prefetch can never push out the tiles under the
/// user's focal point.
pub struct TileBitmapCache {
    entries: HashMap<CacheKey, TileCacheEntry>,
    /// Per-(document, page) index for fallback scans.
    by_page: HashMap<(String, u32), HashSet<TileKey>>,
    bytes_used: usize,
    byte_budget: usize,
    access_counter: u64,
    context: PriorityContext,
    stats: CacheStats,
}

impl TileBitmapCache {
    pub fn new(byte_budget: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_page: HashMap::new(),
            bytes_used: 0,
            byte_budget,
            access_counter: 0,
            context: PriorityContext::idle((1, 1), Vec::new()),
            stats: CacheStats {
                byte_budget,
                ..Default::default()
            },
        }
    }

    pub fn with_mb_budget(megabytes: usize) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    /// Install a fresh interaction snapshot and re-zone all entries.
    ///
    /// Called by the controller when the gesture kind, focal point, or
    /// visible page span changes.
    pub fn set_priority_context(&mut self, context: PriorityContext) {
        self.context = context;
        for entry in self.entries.values_mut() {
            entry.zone = self.context.zone(&entry.coordinate);
        }
    }

    /// Store a rendered tile.
    ///
    /// Replacing an existing entry for the same identity first releases
    /// the old bitmap. Eviction runs before insertion so the budget holds
    /// after the call.
    pub fn put(
        &mut self,
        document: &str,
        coordinate: TileCoordinate,
        bitmap: SharedBitmap,
        epoch: u64,
    ) {
        let key = CacheKey {
            document: document.to_string(),
            tile: coordinate.key(),
        };
        let size = bitmap.byte_size();

        if let Some(old) = self.entries.remove(&key) {
            self.bytes_used = self.bytes_used.saturating_sub(old.bitmap.byte_size());
        }
        self.evict_to_fit(size);

        self.access_counter += 1;
        let entry = TileCacheEntry {
            zone: self.context.zone(&coordinate),
            coordinate,
            bitmap,
            epoch,
            last_access: self.access_counter,
        };
        self.by_page
            .entry((key.document.clone(), coordinate.page))
            .or_default()
            .insert(key.tile);
        self.bytes_used += size;
        self.entries.insert(key, entry);
        self.sync_stats();
    }

    /// Exact lookup; bumps recency on hit.
    pub fn get(&mut self, document: &str, tile: TileKey) -> Option<SharedBitmap> {
        self.get_entry(document, tile).map(|e| e.bitmap.clone())
    }

    /// Exact lookup returning the full entry.
    pub fn get_entry(&mut self, document: &str, tile: TileKey) -> Option<&TileCacheEntry> {
        let key = CacheKey {
            document: document.to_string(),
            tile,
        };
        self.access_counter += 1;
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.last_access = self.access_counter;
                self.stats.hits += 1;
                Some(&*entry)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Check for presence without touching recency or stats.
    pub fn contains(&self, document: &str, tile: TileKey) -> bool {
        self.entries.contains_key(&CacheKey {
            document: document.to_string(),
            tile,
        })
    }

    /// Best available bitmap for a tile: the exact entry if cached,
    /// otherwise a cached tile of the same page at another scale whose
    /// footprint covers this tile's center, as long as the stretch stays
    /// under `max_stretch`.
    ///
    /// `ideal_scale` is the pixel density the display wants (zoom × dpr),
    /// so the returned `css_stretch` reflects blur as actually displayed.
    pub fn get_best_available(
        &mut self,
        document: &str,
        tile: &TileCoordinate,
        ideal_scale: f64,
        max_stretch: f64,
    ) -> Option<FallbackBitmap> {
        if let Some(entry) = self.get_entry(document, tile.key()) {
            let entry = entry.clone();
            return Some(FallbackBitmap {
                css_stretch: ideal_scale / entry.coordinate.scale as f64,
                bitmap: entry.bitmap,
                fallback_tile: entry.coordinate,
                epoch: entry.epoch,
            });
        }

        let doc_page = (document.to_string(), tile.page);
        let page_keys: Vec<TileKey> = self.by_page.get(&doc_page)?.iter().copied().collect();
        let want_center = tile_center(tile);

        let mut best: Option<(f64, TileKey)> = None;
        for key in page_keys {
            if key == tile.key() {
                continue;
            }
            let cache_key = CacheKey {
                document: document.to_string(),
                tile: key,
            };
            let Some(entry) = self.entries.get(&cache_key) else {
                continue;
            };
            let stretch = ideal_scale / entry.coordinate.scale as f64;
            if stretch > max_stretch {
                continue;
            }
            if !tile_rect(&entry.coordinate).contains_point(want_center) {
                continue;
            }
            // Prefer the density closest to exact, counting over- and
            // under-sampling alike.
            let badness = stretch.max(1.0 / stretch).ln();
            if best.map_or(true, |(b, _)| badness < b) {
                best = Some((badness, key));
            }
        }

        let (_, key) = best?;
        self.stats.fallback_hits += 1;
        self.access_counter += 1;
        let entry = self
            .entries
            .get_mut(&CacheKey {
                document: document.to_string(),
                tile: key,
            })
            .expect("indexed entry present");
        entry.last_access = self.access_counter;
        trace!(?key, "serving scale fallback");
        Some(FallbackBitmap {
            css_stretch: ideal_scale / entry.coordinate.scale as f64,
            bitmap: entry.bitmap.clone(),
            fallback_tile: entry.coordinate,
            epoch: entry.epoch,
        })
    }

    /// Drop entries matching a predicate; returns how many were removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&TileCacheEntry) -> bool) -> usize {
        let before = self.entries.len();
        let mut removed_bytes = 0usize;
        let by_page = &mut self.by_page;
        self.entries.retain(|key, entry| {
            if keep(entry) {
                return true;
            }
            removed_bytes += entry.bitmap.byte_size();
            if let Some(set) = by_page.get_mut(&(key.document.clone(), entry.coordinate.page)) {
                set.remove(&key.tile);
            }
            false
        });
        self.bytes_used = self.bytes_used.saturating_sub(removed_bytes);
        self.sync_stats();
        before - self.entries.len()
    }

    /// Drop every entry of a document.
    pub fn clear_document(&mut self, document: &str) -> usize {
        let before = self.entries.len();
        let mut removed_bytes = 0usize;
        self.entries.retain(|key, entry| {
            if key.document == document {
                removed_bytes += entry.bitmap.byte_size();
                false
            } else {
                true
            }
        });
        self.by_page.retain(|(d, _), _| d != document);
        self.bytes_used = self.bytes_used.saturating_sub(removed_bytes);
        self.sync_stats();
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_page.clear();
        self.bytes_used = 0;
        self.sync_stats();
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn pressure(&self) -> MemoryPressure {
        MemoryPressure::from_utilization(self.stats.utilization())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub fn set_byte_budget(&mut self, budget: usize) {
        self.byte_budget = budget;
        self.stats.byte_budget = budget;
        self.evict_to_fit(0);
        self.sync_stats();
    }

    fn sync_stats(&mut self) {
        self.stats.tile_count = self.entries.len();
        self.stats.bytes_used = self.bytes_used;
    }

    /// Evict until `incoming` more bytes fit: least protected zone first,
    /// oldest access within a zone.
    fn evict_to_fit(&mut self, incoming: usize) {
        while !self.entries.is_empty() && self.bytes_used + incoming > self.byte_budget {
            let victim = self
                .entries
                .iter()
                .min_by_key(|(_, e)| (Reverse(e.zone), e.last_access))
                .map(|(k, _)| k.clone());
            let Some(key) = victim else { break };
            if let Some(entry) = self.entries.remove(&key) {
                self.bytes_used = self.bytes_used.saturating_sub(entry.bitmap.byte_size());
                if let Some(set) = self
                    .by_page
                    .get_mut(&(key.document.clone(), entry.coordinate.page))
                {
                    set.remove(&key.tile);
                }
                self.stats.evictions += 1;
                debug!(tile = ?key.tile, zone = ?entry.zone, "evicted tile");
            }
        }
    }
}
