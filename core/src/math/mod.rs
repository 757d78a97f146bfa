pub mod fft;
pub mod matrix;
pub mod stats;
pub mod window;

pub use fft::{fft_shift, suggest_fft_size, FftCache, PaddingPolicy};
pub use matrix::MatrixHelper;
pub use stats::StatsHelper;
pub use window::{WindowCache, WindowType};
