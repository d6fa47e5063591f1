//! Scoped tensor buffers with live-count accounting.
//!
//! Every buffer handed to or produced by a backend holds a [`TensorLease`].
//! The lease is returned when the owner drops, which happens on every exit
//! path, so [`TensorLedger::live`] falls back to zero once a request is done.

use crate::constants::input;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counter of tensors currently alive.
#[derive(Debug, Clone, Default)]
pub struct TensorLedger {
    live: Arc<AtomicUsize>,
}

impl TensorLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new live tensor.
    pub fn lease(&self) -> TensorLease {
        self.live.fetch_add(1, Ordering::SeqCst);
        TensorLease {
            live: Arc::clone(&self.live),
        }
    }

    /// Number of tensors not yet released.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// RAII guard for one live tensor.
#[derive(Debug)]
pub struct TensorLease {
    live: Arc<AtomicUsize>,
}

impl Drop for TensorLease {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Normalized image batch shaped `[1, 224, 224, 3]`, values in `[-1, 1]`.
#[derive(Debug)]
pub struct PreparedTensor {
    data: Vec<f32>,
    _lease: TensorLease,
}

impl PreparedTensor {
    /// Wrap an NHWC buffer. Returns `None` if the length does not match
    /// [`input::SHAPE`].
    pub fn new(data: Vec<f32>, ledger: &TensorLedger) -> Option<Self> {
        if data.len() != Self::len() {
            return None;
        }
        Some(Self {
            data,
            _lease: ledger.lease(),
        })
    }

    /// Tensor shape.
    pub const fn shape(&self) -> [usize; 4] {
        input::SHAPE
    }

    /// Element count for the fixed input shape.
    pub const fn len() -> usize {
        input::SHAPE[0] * input::SHAPE[1] * input::SHAPE[2] * input::SHAPE[3]
    }

    /// Raw values in NHWC order.
    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_released_on_drop() {
        let ledger = TensorLedger::new();
        let a = ledger.lease();
        let b = ledger.lease();
        assert_eq!(ledger.live(), 2);
        drop(a);
        assert_eq!(ledger.live(), 1);
        drop(b);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_prepared_tensor_rejects_wrong_length() {
        let ledger = TensorLedger::new();
        assert!(PreparedTensor::new(vec![0.0; 10], &ledger).is_none());
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_prepared_tensor_holds_lease() {
        let ledger = TensorLedger::new();
        let tensor = PreparedTensor::new(vec![0.0; PreparedTensor::len()], &ledger);
        assert!(tensor.is_some());
        assert_eq!(ledger.live(), 1);
        drop(tensor);
        assert_eq!(ledger.live(), 0);
    }
}
