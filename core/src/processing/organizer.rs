use crate::config::{RadarGeometry, BYTES_PER_SAMPLE};
use crate::prelude::{StageError, StageResult};
use byteorder::{ByteOrder, LittleEndian};
use ndarray::Array3;
use num_complex::Complex32;

/// Complex samples indexed `(virtual channel, chirp, range sample)`.
pub type ComplexCube = Array3<Complex32>;

/// Virtual channel fed by physical receiver `rx` during frame chirp `chirp`
/// under TDM-MIMO.
pub fn virtual_channel(rx: usize, chirp: usize, num_tx: usize, num_rx: usize) -> usize {
    rx + (chirp % num_tx) * num_rx
}

/// Turns raw frame bytes into the virtual-array sample cube.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleOrganizer {
    num_tx: usize,
    num_rx: usize,
    samples: usize,
    chirps_per_frame: usize,
}

impl SampleOrganizer {
    pub fn new(radar: &RadarGeometry) -> Self {
        Self {
            num_tx: radar.num_tx(),
            num_rx: radar.num_rx(),
            samples: radar.num_adc_samples,
            chirps_per_frame: radar.chirps_per_frame(),
        }
    }

    pub fn expected_bytes(&self) -> usize {
        self.chirps_per_frame * self.num_rx * self.samples * BYTES_PER_SAMPLE
    }

    pub fn cube_shape(&self) -> (usize, usize, usize) {
        let chirps = if self.num_tx == 0 {
            0
        } else {
            self.chirps_per_frame / self.num_tx
        };
        (self.num_tx * self.num_rx, chirps, self.samples)
    }

    /// Bytes are chirp-major, then receiver, then sample; each sample is a
    /// little-endian `i16` I followed by `i16` Q.
    pub fn organize(&self, bytes: &[u8]) -> StageResult<ComplexCube> {
        let expected = self.expected_bytes();
        if bytes.len() != expected || self.num_tx == 0 {
            return Err(StageError::ShapeMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        let mut cube = Array3::<Complex32>::zeros(self.cube_shape());
        let chirp_stride = self.num_rx * self.samples * BYTES_PER_SAMPLE;
        let rx_stride = self.samples * BYTES_PER_SAMPLE;
        for chirp in 0..self.chirps_per_frame {
            for rx in 0..self.num_rx {
                let channel = virtual_channel(rx, chirp, self.num_tx, self.num_rx);
                let slow = chirp / self.num_tx;
                let start = chirp * chirp_stride + rx * rx_stride;
                let line = &bytes[start..start + rx_stride];
                for (n, sample) in line.chunks_exact(BYTES_PER_SAMPLE).enumerate() {
                    let i = LittleEndian::read_i16(&sample[0..2]);
                    let q = LittleEndian::read_i16(&sample[2..4]);
                    cube[[channel, slow, n]] = Complex32::new(i as f32, q as f32);
                }
            }
        }
        Ok(cube)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_geometry;

    fn encode(chirp: usize, rx: usize, sample: usize) -> (i16, i16) {
        ((chirp * 100 + rx * 10) as i16, sample as i16)
    }

    #[test]
    fn tdm_chirps_map_to_virtual_channels() {
        let radar = test_geometry();
        let organizer = SampleOrganizer::new(&radar);
        let mut bytes = Vec::with_capacity(organizer.expected_bytes());
        for chirp in 0..radar.chirps_per_frame() {
            for rx in 0..radar.num_rx() {
                for n in 0..radar.num_adc_samples {
                    let (i, q) = encode(chirp, rx, n);
                    bytes.extend_from_slice(&i.to_le_bytes());
                    bytes.extend_from_slice(&q.to_le_bytes());
                }
            }
        }

        let cube = organizer.organize(&bytes).unwrap();
        assert_eq!(cube.shape()[0], radar.num_virtual_channels());
        assert_eq!(cube.shape()[1], radar.doppler_chirps());
        assert_eq!(cube.shape()[2], radar.num_adc_samples);

        // chirp 5 comes from TX 1 in loop 2, receiver 3 lands on channel 3 + 4
        let (i, q) = encode(5, 3, 7);
        assert_eq!(cube[[7, 2, 7]], Complex32::new(i as f32, q as f32));
        let (i, _) = encode(4, 0, 0);
        assert_eq!(cube[[0, 2, 0]].re, i as f32);
    }

    #[test]
    fn wrong_length_is_a_shape_mismatch() {
        let organizer = SampleOrganizer::new(&test_geometry());
        let expected = organizer.expected_bytes();
        assert_eq!(
            organizer.organize(&vec![0u8; expected - 4]),
            Err(StageError::ShapeMismatch {
                expected,
                actual: expected - 4
            })
        );
    }

    #[test]
    fn virtual_channel_count_is_tx_times_rx() {
        assert_eq!(virtual_channel(3, 1, 2, 4), 7);
        assert_eq!(virtual_channel(0, 2, 2, 4), 0);
        let radar = RadarGeometry::default();
        assert_eq!(SampleOrganizer::new(&radar).cube_shape().0, 12);
    }
}
