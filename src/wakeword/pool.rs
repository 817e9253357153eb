//! Detector pool (C4): the active-set of wake-word detectors plus a
//! dedicated, always-present stop-word detector.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::features::FeatureFrame;

use super::{DetectorError, WakeWordDetector, WakeWordManifest};

pub struct DetectorPool {
    catalog: BTreeMap<String, WakeWordManifest>,
    active: BTreeMap<String, WakeWordDetector>,
    stop_word: WakeWordDetector,
    stop_armed: bool,
}

impl DetectorPool {
    pub fn new(
        catalog: Vec<WakeWordManifest>,
        initial_active: &[String],
        stop_model_id: &str,
    ) -> Result<Self, DetectorError> {
        let catalog: BTreeMap<String, WakeWordManifest> =
            catalog.into_iter().map(|m| (m.id.clone(), m)).collect();

        let stop_manifest = catalog.get(stop_model_id).ok_or_else(|| DetectorError::Manifest {
            path: PathBuf::from(stop_model_id),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "stop-word model not found in catalog"),
        })?;
        let stop_word = WakeWordDetector::load(stop_manifest)?;

        let mut pool = Self {
            catalog,
            active: BTreeMap::new(),
            stop_word,
            stop_armed: false,
        };
        pool.set_active(initial_active)?;
        Ok(pool)
    }

    pub fn catalog(&self) -> &BTreeMap<String, WakeWordManifest> {
        &self.catalog
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    /// Atomically replace the active set: loads newly-requested IDs on
    /// demand, drops IDs no longer present. IDs absent from the catalog are
    /// silently skipped (the hub is responsible for only requesting IDs it
    /// was told about).
    pub fn set_active(&mut self, ids: &[String]) -> Result<(), DetectorError> {
        let mut next = BTreeMap::new();
        for id in ids {
            if let Some(detector) = self.active.remove(id) {
                next.insert(id.clone(), detector);
                continue;
            }
            if let Some(manifest) = self.catalog.get(id) {
                next.insert(id.clone(), WakeWordDetector::load(manifest)?);
            }
        }
        self.active = next;
        Ok(())
    }

    pub fn arm_stop_word(&mut self) {
        self.stop_armed = true;
    }

    pub fn disarm_stop_word(&mut self) {
        self.stop_armed = false;
        self.stop_word.reset();
    }

    /// Feed one feature frame to every active detector in deterministic ID
    /// order, plus the stop-word detector if armed. Returns the ID of the
    /// first detector that fired this frame, preferring the stop word.
    pub fn feed_all(&mut self, frame: FeatureFrame) -> Option<String> {
        if self.stop_armed {
            match self.stop_word.feed(frame.clone()) {
                Ok(true) => return Some(self.stop_word.id().to_string()),
                Ok(false) => {}
                Err(err) => log::warn!("stop-word detector faulted: {err}"),
            }
        }

        for (id, detector) in self.active.iter_mut() {
            match detector.feed(frame.clone()) {
                Ok(true) => return Some(id.clone()),
                Ok(false) => {}
                Err(err) => log::warn!("detector {id} faulted: {err}"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str) -> WakeWordManifest {
        WakeWordManifest {
            id: id.to_string(),
            phrase: id.to_string(),
            model_path: PathBuf::from(format!("models/{id}.tflite")),
            probability_cutoff: 0.5,
            sliding_window_size: 5,
            refractory_seconds: 2.0,
            stride_frames: 3,
        }
    }

    #[test]
    fn set_active_rejects_unknown_ids_missing_stop_word() {
        let catalog = vec![manifest("okay_nabu")];
        // No "stop" entry in the catalog: constructing the pool must fail
        // rather than silently operate without a stop-word detector.
        let result = DetectorPool::new(catalog, &[], "stop");
        assert!(result.is_err());
    }
}
