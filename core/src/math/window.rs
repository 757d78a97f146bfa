use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::Arc;

/// Tapering windows applied before each transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    BlackmanHarris,
    Hamming,
    Hann,
    Rectangular,
}

impl Default for WindowType {
    fn default() -> Self {
        WindowType::BlackmanHarris
    }
}

impl WindowType {
    /// Symmetric window coefficients of the given length.
    pub fn coefficients(self, length: usize) -> Vec<f32> {
        if length == 0 {
            return Vec::new();
        }
        if length == 1 {
            return vec![1.0];
        }
        let denom = (length - 1) as f32;
        (0..length)
            .map(|n| {
                let x = 2.0 * PI * n as f32 / denom;
                match self {
                    WindowType::BlackmanHarris => {
                        0.35875 - 0.48829 * x.cos() + 0.14128 * (2.0 * x).cos()
                            - 0.01168 * (3.0 * x).cos()
                    }
                    WindowType::Hamming => 0.54 - 0.46 * x.cos(),
                    WindowType::Hann => 0.5 - 0.5 * x.cos(),
                    WindowType::Rectangular => 1.0,
                }
            })
            .collect()
    }
}

/// Lazily populated window table keyed by `(window, length)`.
#[derive(Default)]
pub struct WindowCache {
    windows: HashMap<(WindowType, usize), Arc<[f32]>>,
}

impl WindowCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, window: WindowType, length: usize) -> Arc<[f32]> {
        self.windows
            .entry((window, length))
            .or_insert_with(|| Arc::from(window.coefficients(length)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }
}
