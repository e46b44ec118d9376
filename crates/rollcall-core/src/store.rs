//! Per-student reference encodings and their on-disk cache.
//!
//! The cache is a JSON object mapping reg no to encoding vectors. It is
//! rebuilt from the roster's reference images whenever it is absent, older
//! than the roster file, or unreadable — a bad cache is never fatal.

use crate::encoder::FaceEncoder;
use crate::roster::Roster;
use crate::types::Encoding;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::mpsc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown student: {0}")]
    UnknownStudent(String),
}

/// Reference encodings for the whole roster, kept in roster order so
/// matching and reporting are deterministic.
#[derive(Debug, Clone)]
pub struct EncodingStore {
    entries: Vec<(String, Vec<Encoding>)>,
    index: HashMap<String, usize>,
}

impl EncodingStore {
    /// A store covering the roster with no encodings yet.
    pub fn empty(roster: &Roster) -> Self {
        let entries: Vec<(String, Vec<Encoding>)> = roster
            .students()
            .iter()
            .map(|s| (s.reg_no.clone(), Vec::new()))
            .collect();
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, (reg_no, _))| (reg_no.clone(), i))
            .collect();
        Self { entries, index }
    }

    /// Iterate `(reg_no, encodings)` in roster order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Encoding])> {
        self.entries
            .iter()
            .map(|(reg_no, encodings)| (reg_no.as_str(), encodings.as_slice()))
    }

    pub fn encodings(&self, reg_no: &str) -> Option<&[Encoding]> {
        self.index
            .get(reg_no)
            .map(|&i| self.entries[i].1.as_slice())
    }

    /// Append a confirmed encoding to a student's reference set.
    pub fn append(&mut self, reg_no: &str, encoding: Encoding) -> Result<(), StoreError> {
        let &i = self
            .index
            .get(reg_no)
            .ok_or_else(|| StoreError::UnknownStudent(reg_no.to_string()))?;
        self.entries[i].1.push(encoding);
        Ok(())
    }

    pub fn total_encodings(&self) -> usize {
        self.entries.iter().map(|(_, e)| e.len()).sum()
    }

    /// Load the cache if it is fresh, otherwise recompute every student's
    /// encodings from the roster images and write a new cache.
    pub fn load_or_rebuild<E: FaceEncoder + Sync>(
        roster: &Roster,
        roster_path: &Path,
        cache_path: &Path,
        encoder: &E,
        workers: usize,
    ) -> Result<Self, StoreError> {
        if cache_is_fresh(roster_path, cache_path) {
            match Self::load(cache_path, roster) {
                Ok(store) => {
                    tracing::info!(
                        path = %cache_path.display(),
                        encodings = store.total_encodings(),
                        "encoding cache loaded"
                    );
                    return Ok(store);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "encoding cache unreadable; recomputing");
                }
            }
        } else {
            tracing::info!(path = %cache_path.display(), "encoding cache absent or stale; recomputing");
        }

        let store = Self::precompute(roster, encoder, workers);
        store.save(cache_path)?;
        Ok(store)
    }

    /// Read the cache file and order its entries by the roster. Cached
    /// students no longer on the roster are dropped; roster students missing
    /// from the cache start empty.
    pub fn load(cache_path: &Path, roster: &Roster) -> Result<Self, StoreError> {
        let raw = fs::read_to_string(cache_path)?;
        let mut map: HashMap<String, Vec<Encoding>> = serde_json::from_str(&raw)?;
        let mut store = Self::empty(roster);
        for (reg_no, encodings) in map.drain() {
            let slot = store.index.get(&reg_no).copied();
            match slot {
                Some(i) => store.entries[i].1 = encodings,
                None => {
                    tracing::warn!(%reg_no, "cached encodings for student not on roster; dropping")
                }
            }
        }
        Ok(store)
    }

    /// Write the whole mapping back to disk.
    pub fn save(&self, cache_path: &Path) -> Result<(), StoreError> {
        let map: BTreeMap<&str, &Vec<Encoding>> = self
            .entries
            .iter()
            .map(|(reg_no, encodings)| (reg_no.as_str(), encodings))
            .collect();
        fs::write(cache_path, serde_json::to_vec(&map)?)?;
        tracing::info!(
            path = %cache_path.display(),
            students = self.entries.len(),
            encodings = self.total_encodings(),
            "encoding cache saved"
        );
        Ok(())
    }

    /// Encode every reference image and collect the results per student.
    ///
    /// Images are statically partitioned over `workers` named threads; an
    /// image that fails to encode is logged and skipped, and an image with
    /// no detectable face contributes nothing. Every face found in a
    /// reference image counts toward that student.
    pub fn precompute<E: FaceEncoder + Sync>(
        roster: &Roster,
        encoder: &E,
        workers: usize,
    ) -> Self {
        let jobs: Vec<(usize, &Path)> = roster
            .students()
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.image_paths.iter().map(move |p| (i, p.as_path())))
            .collect();

        let mut store = Self::empty(roster);
        if jobs.is_empty() {
            tracing::warn!("roster lists no reference images; store starts empty");
            return store;
        }

        let workers = workers.clamp(1, jobs.len());
        let mut buckets: Vec<Vec<(usize, &Path)>> = vec![Vec::new(); workers];
        for (n, job) in jobs.into_iter().enumerate() {
            buckets[n % workers].push(job);
        }

        let (result_tx, result_rx) = mpsc::channel::<(usize, Vec<Encoding>)>();
        std::thread::scope(|scope| {
            for (worker, bucket) in buckets.into_iter().enumerate() {
                let result_tx = result_tx.clone();
                std::thread::Builder::new()
                    .name(format!("rollcall-encode-{worker}"))
                    .spawn_scoped(scope, move || {
                        for (student_idx, path) in bucket {
                            match encoder.encode_image(path) {
                                Ok(detections) => {
                                    if detections.is_empty() {
                                        tracing::warn!(
                                            image = %path.display(),
                                            "no face found in reference image"
                                        );
                                    }
                                    let encodings =
                                        detections.into_iter().map(|d| d.encoding).collect();
                                    let _ = result_tx.send((student_idx, encodings));
                                }
                                Err(e) => {
                                    tracing::warn!(
                                        image = %path.display(),
                                        error = %e,
                                        "failed to encode reference image; skipping"
                                    );
                                }
                            }
                        }
                    })
                    .expect("failed to spawn encode worker");
            }
            drop(result_tx);

            for (student_idx, encodings) in result_rx {
                store.entries[student_idx].1.extend(encodings);
            }
        });

        tracing::info!(
            students = store.entries.len(),
            encodings = store.total_encodings(),
            "reference encodings computed"
        );
        store
    }
}

/// A cache is fresh when it exists and the roster has not been modified
/// since it was written.
pub fn cache_is_fresh(roster_path: &Path, cache_path: &Path) -> bool {
    let cache_mtime = match fs::metadata(cache_path).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return false,
    };
    match fs::metadata(roster_path).and_then(|m| m.modified()) {
        Ok(roster_mtime) => roster_mtime <= cache_mtime,
        // Cannot compare; trust the cache we have.
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncoderError;
    use crate::roster::Student;
    use crate::types::Detection;
    use std::path::PathBuf;

    fn roster_of(entries: &[(&str, &str, &[&str])]) -> Roster {
        Roster::new(
            entries
                .iter()
                .map(|(reg_no, name, paths)| Student {
                    reg_no: reg_no.to_string(),
                    name: name.to_string(),
                    image_paths: paths.iter().map(PathBuf::from).collect(),
                })
                .collect(),
        )
    }

    /// Encoder returning one fixed detection per image whose vector is
    /// derived from the path's file stem, failing for paths named "bad".
    struct FakeEncoder;

    impl FaceEncoder for FakeEncoder {
        fn encode_image(&self, image: &Path) -> Result<Vec<Detection>, EncoderError> {
            let stem = image.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if stem == "bad" {
                return Err(EncoderError::Spawn {
                    program: "fake".into(),
                    source: std::io::Error::other("unreadable"),
                });
            }
            if stem == "empty" {
                return Ok(Vec::new());
            }
            let seed = stem.len() as f32;
            Ok(vec![Detection {
                encoding: Encoding::new(vec![seed, seed]),
                region: None,
            }])
        }
    }

    #[test]
    fn test_empty_store_covers_roster_in_order() {
        let roster = roster_of(&[("R2", "B", &[]), ("R1", "A", &[])]);
        let store = EncodingStore::empty(&roster);
        let order: Vec<&str> = store.iter().map(|(r, _)| r).collect();
        assert_eq!(order, vec!["R2", "R1"]);
        assert_eq!(store.total_encodings(), 0);
    }

    #[test]
    fn test_append_and_lookup() {
        let roster = roster_of(&[("R1", "A", &[])]);
        let mut store = EncodingStore::empty(&roster);
        store.append("R1", Encoding::new(vec![1.0])).unwrap();
        assert_eq!(store.encodings("R1").unwrap().len(), 1);
        assert!(matches!(
            store.append("R9", Encoding::new(vec![1.0])),
            Err(StoreError::UnknownStudent(_))
        ));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("encodings.json");
        let roster = roster_of(&[("R1", "A", &[]), ("R2", "B", &[])]);

        let mut store = EncodingStore::empty(&roster);
        store.append("R2", Encoding::new(vec![0.25, 0.75])).unwrap();
        store.save(&cache).unwrap();

        let loaded = EncodingStore::load(&cache, &roster).unwrap();
        assert_eq!(loaded.encodings("R1"), Some(&[][..]));
        assert_eq!(
            loaded.encodings("R2"),
            Some(&[Encoding::new(vec![0.25, 0.75])][..])
        );
    }

    #[test]
    fn test_load_drops_students_not_on_roster() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("encodings.json");
        fs::write(&cache, r#"{"GONE": [[1.0]], "R1": [[2.0]]}"#).unwrap();

        let roster = roster_of(&[("R1", "A", &[])]);
        let store = EncodingStore::load(&cache, &roster).unwrap();
        assert_eq!(store.encodings("R1").unwrap().len(), 1);
        assert!(store.encodings("GONE").is_none());
    }

    #[test]
    fn test_precompute_collects_per_student() {
        let roster = roster_of(&[
            ("R1", "A", &["a.jpg", "aa.jpg"]),
            ("R2", "B", &["bbb.jpg"]),
            ("R3", "C", &[]),
        ]);
        let store = EncodingStore::precompute(&roster, &FakeEncoder, 2);
        assert_eq!(store.encodings("R1").unwrap().len(), 2);
        assert_eq!(store.encodings("R2").unwrap().len(), 1);
        assert_eq!(store.encodings("R2").unwrap()[0], Encoding::new(vec![3.0, 3.0]));
        assert!(store.encodings("R3").unwrap().is_empty());
    }

    #[test]
    fn test_precompute_skips_failing_and_faceless_images() {
        let roster = roster_of(&[("R1", "A", &["bad.jpg", "empty.jpg", "ok.jpg"])]);
        let store = EncodingStore::precompute(&roster, &FakeEncoder, 4);
        assert_eq!(store.encodings("R1").unwrap().len(), 1);
    }

    #[test]
    fn test_cache_freshness() {
        let dir = tempfile::tempdir().unwrap();
        let roster_path = dir.path().join("Student.csv");
        let cache_path = dir.path().join("encodings.json");

        fs::write(&roster_path, "Reg No,Name\n").unwrap();
        assert!(!cache_is_fresh(&roster_path, &cache_path));

        fs::write(&cache_path, "{}").unwrap();
        assert!(cache_is_fresh(&roster_path, &cache_path));

        // Backdate the cache so the roster is newer.
        let old = std::time::SystemTime::UNIX_EPOCH;
        fs::File::options()
            .write(true)
            .open(&cache_path)
            .unwrap()
            .set_modified(old)
            .unwrap();
        assert!(!cache_is_fresh(&roster_path, &cache_path));
    }

    #[test]
    fn test_load_or_rebuild_recovers_from_malformed_cache() {
        let dir = tempfile::tempdir().unwrap();
        let roster_path = dir.path().join("Student.csv");
        let cache_path = dir.path().join("encodings.json");
        fs::write(&roster_path, "Reg No,Name\n").unwrap();
        fs::write(&cache_path, "not json at all").unwrap();

        let roster = roster_of(&[("R1", "A", &["ok.jpg"])]);
        let store =
            EncodingStore::load_or_rebuild(&roster, &roster_path, &cache_path, &FakeEncoder, 1)
                .unwrap();
        assert_eq!(store.encodings("R1").unwrap().len(), 1);

        // The rebuilt cache replaces the malformed one.
        let reloaded = EncodingStore::load(&cache_path, &roster).unwrap();
        assert_eq!(reloaded.encodings("R1").unwrap().len(), 1);
    }
}
