//! Exploratory summaries of a permit set, printed by the `stats` command.

use crate::data::ISSUED_YEAR;
use crate::types::Attributed;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Valuations at or below this are left out of the value histogram.
const MIN_HISTOGRAM_VALUE: f64 = 10.0;
const HISTOGRAM_BINS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub counts: Vec<usize>,
}

impl Histogram {
    /// Equal-width bins over `[min, max]`; `None` for no finite values.
    pub fn new(values: &[f64], bins: usize) -> Option<Self> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() || bins == 0 {
            return None;
        }
        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let width = (max - min) / bins as f64;
        let mut counts = vec![0; bins];
        for v in finite {
            let bin = if width > 0.0 {
                (((v - min) / width) as usize).min(bins - 1)
            } else {
                0
            };
            counts[bin] += 1;
        }
        Some(Self { min, max, counts })
    }

    pub fn bin_edges(&self, bin: usize) -> (f64, f64) {
        let width = (self.max - self.min) / self.counts.len() as f64;
        (self.min + width * bin as f64, self.min + width * (bin + 1) as f64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermitSummary {
    pub total: usize,
    pub top_occupancy: Vec<(String, usize)>,
    pub top_description: Vec<(String, usize)>,
    pub top_description_by_mean: Vec<(String, f64)>,
    pub issued_years: BTreeMap<i32, usize>,
    /// Histogram of `ln(value)` for values above ten
    pub log_value: Option<Histogram>,
}

/// Summarizes every record given, located or not.
pub fn summarize<T: Attributed>(
    records: &[T],
    value_attribute: &str,
    occupancy_attribute: &str,
    description_attribute: &str,
    top_k: usize,
) -> PermitSummary {
    let mut occupancy: HashMap<&str, usize> = HashMap::new();
    let mut description: HashMap<&str, (usize, f64, usize)> = HashMap::new();
    let mut issued_years = BTreeMap::new();
    let mut log_values = Vec::new();

    for p in records {
        if let Some(o) = p.text(occupancy_attribute) {
            *occupancy.entry(o).or_default() += 1;
        }
        let value = p.number(value_attribute);
        if let Some(d) = p.text(description_attribute) {
            let entry = description.entry(d).or_default();
            entry.0 += 1;
            if let Some(v) = value {
                entry.1 += v;
                entry.2 += 1;
            }
        }
        if let Some(year) = p.number(ISSUED_YEAR) {
            *issued_years.entry(year as i32).or_default() += 1;
        }
        if let Some(v) = value.filter(|&v| v > MIN_HISTOGRAM_VALUE) {
            log_values.push(v.ln());
        }
    }

    let mut top_occupancy: Vec<(String, usize)> =
        occupancy.into_iter().map(|(k, n)| (k.to_string(), n)).collect();
    top_occupancy.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_occupancy.truncate(top_k);

    let mut top_description: Vec<(String, usize)> = description
        .iter()
        .map(|(k, (n, _, _))| (k.to_string(), *n))
        .collect();
    top_description.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_description.truncate(top_k);

    let mut top_description_by_mean: Vec<(String, f64)> = description
        .iter()
        .filter(|(_, (_, _, valued))| *valued > 0)
        .map(|(k, (_, sum, valued))| (k.to_string(), sum / *valued as f64))
        .collect();
    top_description_by_mean.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_description_by_mean.truncate(top_k);

    PermitSummary {
        total: records.len(),
        top_occupancy,
        top_description,
        top_description_by_mean,
        issued_years,
        log_value: Histogram::new(&log_values, HISTOGRAM_BINS),
    }
}

impl fmt::Display for PermitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} permits", self.total)?;
        writeln!(f, "\nMost common occupancy types:")?;
        for (name, n) in &self.top_occupancy {
            writeln!(f, "  {name:<32} {n:>8}")?;
        }
        writeln!(f, "\nMost common descriptions:")?;
        for (name, n) in &self.top_description {
            writeln!(f, "  {name:<32} {n:>8}")?;
        }
        writeln!(f, "\nHighest mean valuation by description:")?;
        for (name, mean) in &self.top_description_by_mean {
            writeln!(f, "  {name:<32} {mean:>16.2}")?;
        }
        writeln!(f, "\nPermits issued per year:")?;
        for (year, n) in &self.issued_years {
            writeln!(f, "  {year} {n:>8}")?;
        }
        if let Some(hist) = &self.log_value {
            writeln!(f, "\nln(declared value) distribution:")?;
            for (bin, n) in hist.counts.iter().enumerate() {
                let (lo, hi) = hist.bin_edges(bin);
                writeln!(f, "  [{lo:>6.2}, {hi:>6.2}) {n:>8}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttributeRecord, PointRecord};
    use pretty_assertions::assert_eq;

    fn permit(occupancy: &str, description: &str, value: f64, year: f64) -> PointRecord {
        PointRecord::new(0.0, 0.0)
            .unwrap()
            .with_text("occupancytype", occupancy)
            .with_text("description", description)
            .with_number("declared_valuation", value)
            .with_number(ISSUED_YEAR, year)
    }

    #[test]
    fn test_summary_counts_and_means() {
        let points = vec![
            permit("1-2FAM", "Electrical", 100.0, 2015.0),
            permit("1-2FAM", "Electrical", 300.0, 2016.0),
            permit("Comm", "New construction", 5e6, 2016.0),
            permit("Mixed", "Erect", 1e6, 2018.0),
            permit("Comm", "Electrical", 200.0, 2016.0),
        ];
        let summary = summarize(&points, "declared_valuation", "occupancytype", "description", 2);
        assert_eq!(summary.total, 5);
        assert_eq!(
            summary.top_occupancy,
            vec![("1-2FAM".to_string(), 2), ("Comm".to_string(), 2)]
        );
        assert_eq!(summary.top_description[0], ("Electrical".to_string(), 3));
        assert_eq!(
            summary.top_description_by_mean,
            vec![("New construction".to_string(), 5e6), ("Erect".to_string(), 1e6)]
        );
        assert_eq!(summary.issued_years.get(&2016), Some(&3));
        let hist = summary.log_value.unwrap();
        assert_eq!(hist.counts.iter().sum::<usize>(), 5);
        assert_eq!(hist.counts.len(), 20);
        assert!(summary_text_mentions(&points));
    }

    fn summary_text_mentions(points: &[PointRecord]) -> bool {
        let text = summarize(points, "declared_valuation", "occupancytype", "description", 5).to_string();
        text.contains("5 permits") && text.contains("New construction")
    }

    #[test]
    fn test_unlocated_rows_are_summarized() {
        let rows = vec![
            AttributeRecord::default()
                .with_text("occupancytype", "1-2FAM")
                .with_number("declared_valuation", 1200.0)
                .with_number(ISSUED_YEAR, 2016.0),
            // no coordinates upstream, and no valuation
            AttributeRecord::default()
                .with_text("occupancytype", "1-2FAM")
                .with_text("description", "Erect")
                .with_number(ISSUED_YEAR, 2017.0),
            AttributeRecord::default().with_number(ISSUED_YEAR, 2018.0),
        ];
        let summary = summarize(&rows, "declared_valuation", "occupancytype", "description", 5);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.top_occupancy, vec![("1-2FAM".to_string(), 2)]);
        assert_eq!(summary.top_description, vec![("Erect".to_string(), 1)]);
        assert!(summary.top_description_by_mean.is_empty());
        assert_eq!(
            summary.issued_years.into_iter().collect::<Vec<_>>(),
            vec![(2016, 1), (2017, 1), (2018, 1)]
        );
        assert_eq!(summary.log_value.unwrap().counts.iter().sum::<usize>(), 1);
    }

    #[test]
    fn test_histogram_edges() {
        let hist = Histogram::new(&[0.0, 1.0, 2.0, 3.0, 4.0], 4).unwrap();
        assert_eq!(hist.counts, vec![1, 1, 1, 2]);
        assert_eq!(hist.bin_edges(1), (1.0, 2.0));
        assert!(Histogram::new(&[], 4).is_none());
        assert_eq!(Histogram::new(&[7.0, 7.0], 3).unwrap().counts, vec![2, 0, 0]);
    }
}
