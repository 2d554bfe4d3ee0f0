use itertools::Itertools;

/// Summary of a set of samples, e.g. response sizes
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Distribution {
    pub min: u64,
    pub max: u64,
    pub range: u64,
    pub mean: f64,
    pub median: f64,
    pub mode: u64,
}

impl Distribution {
    pub fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Distribution::default();
        }
        let sorted: Vec<u64> = samples.iter().copied().sorted_unstable().collect();
        let min = sorted[0];
        let max = sorted[sorted.len() - 1];
        let sum: u128 = sorted.iter().map(|s| *s as u128).sum();
        let mid = sorted.len() / 2;
        let median = match sorted.len() % 2 {
            0 => (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0,
            _ => sorted[mid] as f64,
        };
        // Most frequent value, the smallest one wins a tie
        let mode = sorted
            .iter()
            .counts()
            .into_iter()
            .max_by(|(a, a_count), (b, b_count)| a_count.cmp(b_count).then(b.cmp(a)))
            .map(|(value, _)| *value)
            .unwrap_or_default();

        Distribution {
            min,
            max,
            range: max - min,
            mean: sum as f64 / sorted.len() as f64,
            median,
            mode,
        }
    }
}

/// `part / whole * 100`, 0 when there is no whole
pub fn percent(part: f64, whole: f64) -> f64 {
    match whole == 0.0 {
        true => 0.0,
        false => part / whole * 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution() {
        let dist = Distribution::from_samples(&[500, 100, 100, 300, 0, 300]);
        assert_eq!(
            Distribution {
                min: 0,
                max: 500,
                range: 500,
                mean: 1300.0 / 6.0,
                median: 200.0,
                mode: 100,
            },
            dist
        );
    }

    #[test]
    fn test_distribution_odd_and_single() {
        let dist = Distribution::from_samples(&[7, 1, 3]);
        assert_eq!(3.0, dist.median);
        assert_eq!(1, dist.mode);
        assert_eq!(6, dist.range);

        let single = Distribution::from_samples(&[42]);
        assert_eq!(42, single.min);
        assert_eq!(42.0, single.mean);
        assert_eq!(42, single.mode);
    }

    #[test]
    fn test_distribution_empty() {
        assert_eq!(Distribution::default(), Distribution::from_samples(&[]));
    }

    #[test]
    fn test_percent() {
        assert_eq!(0.0, percent(5.0, 0.0));
        assert_eq!(25.0, percent(1.0, 4.0));
    }
}
