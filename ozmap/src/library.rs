//! A directory tree of calibrated maps.
//!
//! [`MapLibrary`] loads every `.map` file below a root directory, keeps the
//! usable ones in a [`SpatialIndex`] and the rest in a bad map list. The parsed
//! library can be persisted as JSON; a content hash of the file list tells
//! whether a persisted index still matches the directory.
//!
//! # Example
//!
//! ```ignore
//! use ozmap::MapLibraryBuilder;
//!
//! let library = MapLibraryBuilder::new("/data/maps")
//!     .index_file("/data/maps/index.json")
//!     .build()?;
//!
//! for map in library.maps_at(46.5, 7.9) {
//!     println!("{} ({} m/px)", map.title, map.absolute_mpp());
//! }
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::decoder::DecoderKind;
use crate::error::{MapError, Result};
use crate::index::SpatialIndex;
use crate::loader::load_map;
use crate::map::{string_hash, Bounds, MapDefinition, MapId};
use crate::session::{MapSession, SessionOptions, DEFAULT_CACHE_FACTOR};

const HASH_SEED: u32 = 13;

/// Every `.map` file below `root` (extension matched case-insensitively),
/// sorted by path.
pub fn find_map_files<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("map"))
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// 31-based hash over the paths of a file list.
pub fn content_hash(files: &[PathBuf]) -> u32 {
    files.iter().fold(HASH_SEED, |hash, file| {
        hash.wrapping_mul(31)
            .wrapping_add(string_hash(&file.to_string_lossy()))
    })
}

#[derive(Serialize, Deserialize)]
struct SavedIndex<M> {
    root: PathBuf,
    content_hash: u32,
    maps: Vec<M>,
}

/// Every map of a directory tree, indexed by coverage.
#[derive(Debug, Clone)]
pub struct MapLibrary {
    root: PathBuf,
    index: SpatialIndex,
    bad_maps: Vec<Arc<MapDefinition>>,
    content_hash: u32,
    options: SessionOptions,
}

impl MapLibrary {
    /// Create an empty library rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P, options: SessionOptions) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            index: SpatialIndex::new(),
            bad_maps: Vec::new(),
            content_hash: content_hash(&[]),
            options,
        }
    }

    /// Load every `.map` file below `root`.
    ///
    /// Files are parsed in parallel. Maps that fail to parse, calibrate or
    /// index end up in [`bad_maps`](Self::bad_maps); they never fail the scan.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Io`] if `root` cannot be resolved.
    pub fn scan<P: AsRef<Path>>(root: P, options: SessionOptions) -> Result<Self> {
        let root = root.as_ref().canonicalize()?;
        let files = find_map_files(&root);
        Ok(Self::from_files(root, &files, options))
    }

    fn from_files(root: PathBuf, files: &[PathBuf], options: SessionOptions) -> Self {
        let maps: Vec<MapDefinition> = files.par_iter().map(|file| load_map(file)).collect();

        let mut library = Self::new(root, options);
        library.content_hash = content_hash(files);
        for map in maps {
            // Failures land in the bad map list
            let _ = library.add_map(map);
        }
        info!(
            root = %library.root.display(),
            maps = library.len(),
            bad_maps = library.bad_maps.len(),
            "Loaded map library"
        );
        library
    }

    /// Restore a library written by [`save_index`](Self::save_index).
    ///
    /// Every usable map is re-fitted, since bindings are not persisted.
    ///
    /// # Errors
    ///
    /// * [`MapError::Io`] if the file cannot be read
    /// * [`MapError::Index`] if it is not a valid index
    pub fn load_index<P: AsRef<Path>>(path: P, options: SessionOptions) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let saved: SavedIndex<MapDefinition> = serde_json::from_reader(reader)?;

        let mut library = Self::new(saved.root, options);
        library.content_hash = saved.content_hash;
        for mut map in saved.maps {
            if map.load_error.is_none() {
                if let Err(err) = map.initialize() {
                    map.load_error = Some(err.to_string());
                }
            }
            let _ = library.add_map(map);
        }
        debug!(
            path = %path.as_ref().display(),
            maps = library.len(),
            "Restored map library index"
        );
        Ok(library)
    }

    /// Persist every map, good and bad, as JSON.
    ///
    /// # Errors
    ///
    /// * [`MapError::Io`] if the file cannot be written
    /// * [`MapError::Index`] if serialisation fails
    pub fn save_index<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut maps: Vec<&MapDefinition> = self
            .index
            .maps()
            .chain(self.bad_maps.iter())
            .map(|map| map.as_ref())
            .collect();
        maps.sort_by(|a, b| a.path.cmp(&b.path));

        let saved = SavedIndex {
            root: self.root.clone(),
            content_hash: self.content_hash,
            maps,
        };
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(&mut writer, &saved)?;
        writer.flush()?;
        Ok(())
    }

    /// Root directory of the library.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hash of the file list the library was built from.
    pub fn content_hash(&self) -> u32 {
        self.content_hash
    }

    /// Options applied to activated maps.
    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// The spatial index of usable maps.
    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Number of usable maps.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Usable maps sorted by title.
    pub fn maps(&self) -> Vec<Arc<MapDefinition>> {
        let mut maps: Vec<_> = self.index.maps().cloned().collect();
        maps.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        maps
    }

    /// Maps that could not be used, with their `load_error` set.
    pub fn bad_maps(&self) -> &[Arc<MapDefinition>] {
        &self.bad_maps
    }

    /// Look up a map, usable or not.
    pub fn get(&self, id: MapId) -> Option<Arc<MapDefinition>> {
        self.index
            .get(id)
            .cloned()
            .or_else(|| self.bad_maps.iter().find(|map| map.id == id).cloned())
    }

    /// Add a map to the library.
    ///
    /// Returns `true` if the map was indexed and `false` if it was already
    /// present or carries a `load_error` (it is then kept as a bad map).
    ///
    /// # Errors
    ///
    /// Returns the index error if the map cannot be indexed, e.g.
    /// [`MapError::OutOfBounds`]. The map is kept as a bad map.
    pub fn add_map(&mut self, map: MapDefinition) -> Result<bool> {
        if let Some(reason) = &map.load_error {
            warn!(path = %map.path.display(), reason = %reason, "Skipping bad map");
            self.push_bad(map);
            return Ok(false);
        }

        let map = Arc::new(map);
        match self.index.insert(Arc::clone(&map)) {
            Ok(added) => {
                self.bad_maps.retain(|bad| bad.id != map.id);
                Ok(added)
            }
            Err(err) => {
                warn!(path = %map.path.display(), error = %err, "Map cannot be indexed");
                let mut bad = Arc::unwrap_or_clone(map);
                bad.load_error = Some(err.to_string());
                self.push_bad(bad);
                Err(err)
            }
        }
    }

    fn push_bad(&mut self, map: MapDefinition) {
        self.bad_maps.retain(|bad| bad.id != map.id);
        self.bad_maps.push(Arc::new(map));
    }

    /// Remove a map, usable or not.
    pub fn remove_map(&mut self, id: MapId) -> Option<Arc<MapDefinition>> {
        if let Some(map) = self.index.remove(id) {
            return Some(map);
        }
        let pos = self.bad_maps.iter().position(|map| map.id == id)?;
        Some(self.bad_maps.remove(pos))
    }

    /// Forget every bad map and return them.
    pub fn clean_bad_maps(&mut self) -> Vec<Arc<MapDefinition>> {
        std::mem::take(&mut self.bad_maps)
    }

    /// Usable maps covering a point, most detailed first.
    pub fn maps_at(&self, lat: f64, lon: f64) -> Vec<Arc<MapDefinition>> {
        self.index.query_point(lat, lon)
    }

    /// Maps that could replace `reference` for showing `area`.
    ///
    /// See [`SpatialIndex::query_coverage`].
    pub fn covering_maps(
        &self,
        reference: &MapDefinition,
        area: &Bounds,
        covering: bool,
        best_fit: bool,
    ) -> Vec<Arc<MapDefinition>> {
        self.index.query_coverage(reference, area, covering, best_fit)
    }

    /// Activate a map with the library's session options.
    ///
    /// # Errors
    ///
    /// * [`MapError::NotFound`] if no map has this id
    /// * otherwise as [`MapDefinition::activate`]
    pub fn activate(&self, id: MapId, viewport_pixels: u64) -> Result<MapSession> {
        let map = self.get(id).ok_or_else(|| MapError::NotFound {
            what: format!("map {}", id),
        })?;
        map.activate(viewport_pixels, &self.options)
    }
}

/// Builder for [`MapLibrary`] with custom configuration.
///
/// # Example
///
/// ```ignore
/// use ozmap::{DecoderKind, MapLibraryBuilder};
///
/// let library = MapLibraryBuilder::new("/data/maps")
///     .cache_factor(2.0)
///     .decoder(DecoderKind::Streaming)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct MapLibraryBuilder {
    maps_dir: PathBuf,
    cache_factor: f64,
    decoder: DecoderKind,
    index_file: Option<PathBuf>,
}

impl MapLibraryBuilder {
    /// Create a new builder for the specified maps directory.
    pub fn new<P: AsRef<Path>>(maps_dir: P) -> Self {
        Self {
            maps_dir: maps_dir.as_ref().to_path_buf(),
            cache_factor: DEFAULT_CACHE_FACTOR,
            decoder: DecoderKind::default(),
            index_file: None,
        }
    }

    /// Create a builder configured from environment variables.
    ///
    /// # Environment Variables
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `OZMAP_MAPS_DIR` | Directory scanned for .map files | Required |
    /// | `OZMAP_CACHE_FACTOR` | Tile cache size as a multiple of one viewport | 3 |
    /// | `OZMAP_DECODER` | Tile decoder: "portable" or "streaming" | portable |
    /// | `OZMAP_INDEX_FILE` | JSON file persisting the parsed library | None |
    ///
    /// Invalid values fall back to the default.
    ///
    /// ```ignore
    /// use ozmap::MapLibraryBuilder;
    ///
    /// let library = MapLibraryBuilder::from_env()?.build()?;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if `OZMAP_MAPS_DIR` is not set.
    pub fn from_env() -> Result<Self> {
        let maps_dir = std::env::var("OZMAP_MAPS_DIR").map_err(|_| {
            MapError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "OZMAP_MAPS_DIR environment variable not set",
            ))
        })?;

        let cache_factor = std::env::var("OZMAP_CACHE_FACTOR")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|f| f.is_finite() && *f > 0.0)
            .unwrap_or(DEFAULT_CACHE_FACTOR);

        let decoder = std::env::var("OZMAP_DECODER")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        let index_file = std::env::var("OZMAP_INDEX_FILE").ok().map(PathBuf::from);

        Ok(Self {
            maps_dir: PathBuf::from(maps_dir),
            cache_factor,
            decoder,
            index_file,
        })
    }

    /// Set the maps directory.
    pub fn maps_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.maps_dir = path.as_ref().to_path_buf();
        self
    }

    /// Set the tile cache size as a multiple of the tiles one viewport needs.
    ///
    /// Default is 3.
    pub fn cache_factor(mut self, factor: f64) -> Self {
        self.cache_factor = factor;
        self
    }

    pub fn decoder(mut self, decoder: DecoderKind) -> Self {
        self.decoder = decoder;
        self
    }

    /// Persist the parsed library to this file and reuse it while the set of
    /// `.map` files is unchanged.
    pub fn index_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.index_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Session options resulting from this configuration.
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            decoder: self.decoder,
            cache_factor: self.cache_factor,
        }
    }

    /// Build the [`MapLibrary`].
    ///
    /// With an index file, the persisted library is used when its root and
    /// content hash match the directory; otherwise the directory is scanned
    /// and the index rewritten. An unreadable index is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Io`] if the maps directory cannot be resolved or
    /// the index file cannot be written.
    pub fn build(self) -> Result<MapLibrary> {
        let options = self.options();
        let root = self.maps_dir.canonicalize()?;
        let files = find_map_files(&root);

        let Some(index_file) = self.index_file else {
            return Ok(MapLibrary::from_files(root, &files, options));
        };

        if index_file.exists() {
            match MapLibrary::load_index(&index_file, options) {
                Ok(library) if library.root == root && library.content_hash == content_hash(&files) => {
                    info!(path = %index_file.display(), maps = library.len(), "Using saved map index");
                    return Ok(library);
                }
                Ok(_) => debug!(path = %index_file.display(), "Saved map index is stale"),
                Err(err) => warn!(path = %index_file.display(), error = %err, "Ignoring unreadable map index"),
            }
        }

        let library = MapLibrary::from_files(root, &files, options);
        library.save_index(&index_file)?;
        Ok(library)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::fixtures::square_map;
    use crate::session::fixtures::write_map;
    use tempfile::TempDir;

    const VIEWPORT: u64 = 800 * 480;

    /// Two maps over 10..11 N, 20..21 E (one in a subdirectory) and one
    /// unparsable file.
    fn library_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        write_map(dir.path(), "detailed", 10, 20, 5.0);
        let sub = dir.path().join("regional");
        std::fs::create_dir(&sub).unwrap();
        write_map(&sub, "overview", 10, 20, 50.0);
        std::fs::write(dir.path().join("broken.MAP"), "not a map\r\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        dir
    }

    #[test]
    fn test_find_map_files() {
        let dir = library_dir();
        let files = find_map_files(dir.path());
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["broken.MAP", "detailed.map", "overview.map"]);
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(content_hash(&[]), 13);
        assert_eq!(content_hash(&[PathBuf::from("a")]), 13 * 31 + 97);

        let a = vec![PathBuf::from("/maps/a.map"), PathBuf::from("/maps/b.map")];
        let b = vec![PathBuf::from("/maps/b.map"), PathBuf::from("/maps/a.map")];
        assert_ne!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&a[..1]));
    }

    #[test]
    fn test_scan() {
        let dir = library_dir();
        let library = MapLibrary::scan(dir.path(), SessionOptions::default()).unwrap();

        assert_eq!(library.len(), 2);
        assert_eq!(library.bad_maps().len(), 1);
        assert!(library.bad_maps()[0].load_error.is_some());
        assert_eq!(library.root(), dir.path().canonicalize().unwrap());

        let titles: Vec<_> = library.maps_at(10.5, 20.5).iter().map(|m| m.title.clone()).collect();
        assert_eq!(titles, vec!["detailed", "overview"]);
        assert!(library.maps_at(30.0, 20.5).is_empty());

        let titles: Vec<_> = library.maps().iter().map(|m| m.title.clone()).collect();
        assert_eq!(titles, vec!["detailed", "overview"]);
    }

    #[test]
    fn test_scan_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = MapLibrary::scan(dir.path().join("nope"), SessionOptions::default());
        assert!(matches!(result, Err(MapError::Io(_))));
    }

    #[test]
    fn test_add_map_off_grid() {
        let mut library = MapLibrary::new("/maps", SessionOptions::default());
        assert!(library.add_map(square_map("local", 10.0, 20.0, 5.0)).unwrap());
        assert!(!library.add_map(square_map("local", 10.0, 20.0, 5.0)).unwrap());

        let result = library.add_map(square_map("polar", 89.6, 0.0, 5.0));
        assert!(matches!(result, Err(MapError::OutOfBounds { .. })));
        assert_eq!(library.len(), 1);
        assert_eq!(library.bad_maps().len(), 1);
        assert!(library.bad_maps()[0].load_error.is_some());

        let removed = library.clean_bad_maps();
        assert_eq!(removed.len(), 1);
        assert!(library.bad_maps().is_empty());
        assert_eq!(library.len(), 1);
    }

    #[test]
    fn test_add_map_with_load_error() {
        let mut library = MapLibrary::new("/maps", SessionOptions::default());
        let mut map = square_map("broken", 10.0, 20.0, 5.0);
        map.load_error = Some("bad corner".into());
        let id = map.id;

        assert!(!library.add_map(map).unwrap());
        assert!(library.is_empty());
        assert!(library.get(id).is_some());

        // A fixed version replaces the bad one
        assert!(library.add_map(square_map("broken", 10.0, 20.0, 5.0)).unwrap());
        assert!(library.bad_maps().is_empty());
    }

    #[test]
    fn test_get_and_remove() {
        let dir = library_dir();
        let mut library = MapLibrary::scan(dir.path(), SessionOptions::default()).unwrap();

        let detailed = library.maps_at(10.5, 20.5)[0].clone();
        assert_eq!(library.get(detailed.id).unwrap().title, "detailed");

        let removed = library.remove_map(detailed.id).unwrap();
        assert_eq!(removed.id, detailed.id);
        assert!(library.get(detailed.id).is_none());
        assert_eq!(library.maps_at(10.5, 20.5).len(), 1);

        let bad_id = library.bad_maps()[0].id;
        assert!(library.remove_map(bad_id).is_some());
        assert!(library.bad_maps().is_empty());
        assert!(library.remove_map(bad_id).is_none());
    }

    #[test]
    fn test_covering_maps() {
        let mut library = MapLibrary::new("/maps", SessionOptions::default());
        let reference = square_map("reference", 10.0, 20.0, 10.0);
        library.add_map(reference.clone()).unwrap();
        library.add_map(square_map("fine", 10.0, 20.0, 5.0)).unwrap();

        let area = Bounds::new(10.2, 20.2, 10.8, 20.8);
        let found = library.covering_maps(&reference, &area, false, true);
        let titles: Vec<_> = found.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["fine"]);

        assert!(library.covering_maps(&reference, &area, true, false).is_empty());
    }

    #[test]
    fn test_activate() {
        let dir = library_dir();
        let library = MapLibrary::scan(dir.path(), SessionOptions::default()).unwrap();

        let id = library.maps_at(10.5, 20.5)[0].id;
        let session = library.activate(id, VIEWPORT).unwrap();
        assert_eq!(session.pixel_from_geo(10.5, 20.5).unwrap(), (500, 500));
        session.deactivate();

        assert!(matches!(library.activate(12345, VIEWPORT), Err(MapError::NotFound { .. })));
        let bad_id = library.bad_maps()[0].id;
        assert!(library.activate(bad_id, VIEWPORT).is_err());
    }

    #[test]
    fn test_index_round_trip() {
        let dir = library_dir();
        let library = MapLibrary::scan(dir.path(), SessionOptions::default()).unwrap();
        let index_path = dir.path().join("index.json");
        library.save_index(&index_path).unwrap();

        let restored = MapLibrary::load_index(&index_path, SessionOptions::default()).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.bad_maps().len(), 1);
        assert_eq!(restored.root(), library.root());
        assert_eq!(restored.content_hash(), library.content_hash());

        // Bindings are re-fitted on load
        let maps = restored.maps_at(10.5, 20.5);
        assert_eq!(maps.len(), 2);
        assert!(maps.iter().all(|m| m.binding().is_some()));
        let id = maps[0].id;
        assert!(restored.activate(id, VIEWPORT).is_ok());
    }

    #[test]
    fn test_load_index_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "{ not json").unwrap();
        let result = MapLibrary::load_index(&path, SessionOptions::default());
        assert!(matches!(result, Err(MapError::Index(_))));

        let result = MapLibrary::load_index(dir.path().join("missing.json"), SessionOptions::default());
        assert!(matches!(result, Err(MapError::Io(_))));
    }

    #[test]
    fn test_builder_reuses_index() {
        let dir = library_dir();
        let index_dir = tempfile::tempdir().unwrap();
        let index_path = index_dir.path().join("index.json");

        let library = MapLibraryBuilder::new(dir.path()).index_file(&index_path).build().unwrap();
        assert_eq!(library.len(), 2);
        assert!(index_path.exists());

        // Same file list: the saved definitions are used, not the files
        std::fs::write(dir.path().join("detailed.map"), "garbage").unwrap();
        let library = MapLibraryBuilder::new(dir.path()).index_file(&index_path).build().unwrap();
        assert_eq!(library.len(), 2);

        // A new file invalidates the index
        write_map(dir.path(), "extra", 40, 20, 5.0);
        let library = MapLibraryBuilder::new(dir.path()).index_file(&index_path).build().unwrap();
        assert_eq!(library.len(), 2);
        assert_eq!(library.bad_maps().len(), 2);
        assert_eq!(library.maps_at(40.5, 20.5)[0].title, "extra");
    }

    #[test]
    fn test_builder_ignores_corrupt_index() {
        let dir = library_dir();
        let index_path = dir.path().join("index.json");
        std::fs::write(&index_path, "corrupt").unwrap();

        let library = MapLibraryBuilder::new(dir.path()).index_file(&index_path).build().unwrap();
        assert_eq!(library.len(), 2);
        assert!(MapLibrary::load_index(&index_path, SessionOptions::default()).is_ok());
    }

    #[test]
    fn test_builder_options() {
        let builder = MapLibraryBuilder::new("/maps")
            .cache_factor(2.0)
            .decoder(DecoderKind::Streaming)
            .maps_dir("/other");
        assert_eq!(builder.maps_dir, PathBuf::from("/other"));
        assert_eq!(
            builder.options(),
            SessionOptions {
                decoder: DecoderKind::Streaming,
                cache_factor: 2.0,
            }
        );
    }

    #[test]
    fn test_from_env() {
        const VARS: [&str; 4] = [
            "OZMAP_MAPS_DIR",
            "OZMAP_CACHE_FACTOR",
            "OZMAP_DECODER",
            "OZMAP_INDEX_FILE",
        ];
        let originals: Vec<_> = VARS.iter().map(|v| std::env::var(v).ok()).collect();
        for var in VARS {
            std::env::remove_var(var);
        }

        assert!(MapLibraryBuilder::from_env().is_err());

        let temp_dir = tempfile::tempdir().unwrap();
        std::env::set_var("OZMAP_MAPS_DIR", temp_dir.path());
        let builder = MapLibraryBuilder::from_env().unwrap();
        assert_eq!(builder.maps_dir, temp_dir.path());
        assert_eq!(builder.options(), SessionOptions::default());
        assert!(builder.index_file.is_none());

        std::env::set_var("OZMAP_CACHE_FACTOR", "1.5");
        std::env::set_var("OZMAP_DECODER", "streaming");
        std::env::set_var("OZMAP_INDEX_FILE", "/tmp/index.json");
        let builder = MapLibraryBuilder::from_env().unwrap();
        assert_eq!(builder.cache_factor, 1.5);
        assert_eq!(builder.decoder, DecoderKind::Streaming);
        assert_eq!(builder.index_file, Some(PathBuf::from("/tmp/index.json")));

        std::env::set_var("OZMAP_CACHE_FACTOR", "-2");
        std::env::set_var("OZMAP_DECODER", "fast");
        let builder = MapLibraryBuilder::from_env().unwrap();
        assert_eq!(builder.cache_factor, DEFAULT_CACHE_FACTOR);
        assert_eq!(builder.decoder, DecoderKind::Portable);

        for (var, original) in VARS.iter().zip(originals) {
            match original {
                Some(v) => std::env::set_var(var, v),
                None => std::env::remove_var(var),
            }
        }
    }
}
