use std::collections::HashMap;
use std::sync::Mutex;

use super::{CalibrationError, CalibrationKey, CalibrationModifier};

/// Key-value persistence for calibration modifiers.
///
/// Writes go through [`compare_and_swap`](Self::compare_and_swap) so two
/// instances updating the same key cannot lose an increment.
pub trait CalibrationStore: Send + Sync {
    fn get(&self, key: &CalibrationKey) -> Result<Option<CalibrationModifier>, CalibrationError>;

    /// Stores `next` only if the current revision equals `expected_revision`
    /// (`None` meaning the key is absent). Returns whether the swap happened.
    fn compare_and_swap(
        &self,
        key: &CalibrationKey,
        expected_revision: Option<u64>,
        next: CalibrationModifier,
    ) -> Result<bool, CalibrationError>;

    fn all(&self) -> Result<Vec<CalibrationModifier>, CalibrationError>;
}

#[derive(Debug, Default)]
pub struct InMemoryCalibrationStore {
    modifiers: Mutex<HashMap<CalibrationKey, CalibrationModifier>>,
}

impl InMemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<CalibrationKey, CalibrationModifier>>, CalibrationError>
    {
        self.modifiers
            .lock()
            .map_err(|_| CalibrationError::Store("calibration store mutex poisoned".to_string()))
    }
}

impl CalibrationStore for InMemoryCalibrationStore {
    fn get(&self, key: &CalibrationKey) -> Result<Option<CalibrationModifier>, CalibrationError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn compare_and_swap(
        &self,
        key: &CalibrationKey,
        expected_revision: Option<u64>,
        next: CalibrationModifier,
    ) -> Result<bool, CalibrationError> {
        let mut guard = self.lock()?;
        let current = guard.get(key).map(|modifier| modifier.revision);
        if current != expected_revision {
            return Ok(false);
        }
        guard.insert(key.clone(), next);
        Ok(true)
    }

    fn all(&self) -> Result<Vec<CalibrationModifier>, CalibrationError> {
        Ok(self.lock()?.values().cloned().collect())
    }
}
