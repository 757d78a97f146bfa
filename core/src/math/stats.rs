/// Summary figures of power profiles, used by the periodic progress logs.
pub struct StatsHelper;

impl StatsHelper {
    pub fn mean(values: &[f32]) -> f32 {
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f32>() / values.len() as f32
    }

    /// Index and value of the largest finite entry.
    pub fn peak(values: &[f32]) -> Option<(usize, f32)> {
        values
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Power ratio in decibels, floored to avoid `log10(0)`.
    pub fn power_db(power: f32) -> f32 {
        10.0 * (power.max(1e-20)).log10()
    }

    /// How far the peak stands above the mean, in dB; 0 for an empty or
    /// all-zero profile.
    pub fn peak_to_mean_db(values: &[f32]) -> f32 {
        let mean = Self::mean(values);
        match Self::peak(values) {
            Some((_, peak)) if mean > 0.0 => Self::power_db(peak / mean),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_profile_has_neutral_figures() {
        assert_eq!(StatsHelper::mean(&[]), 0.0);
        assert_eq!(StatsHelper::peak(&[]), None);
        assert_eq!(StatsHelper::peak_to_mean_db(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn peak_skips_non_finite_values() {
        assert_eq!(StatsHelper::peak(&[1.0, f32::NAN, 3.0, 2.0]), Some((2, 3.0)));
    }

    #[test]
    fn power_db_of_hundred_is_twenty() {
        assert!((StatsHelper::power_db(100.0) - 20.0).abs() < 1e-5);
        assert!(StatsHelper::power_db(0.0).is_finite());
    }

    #[test]
    fn single_spike_stands_out_by_bin_count() {
        let mut profile = vec![0.0f32; 10];
        profile[4] = 10.0;
        assert!((StatsHelper::peak_to_mean_db(&profile) - 10.0).abs() < 1e-4);
    }
}
