// Metrics module - validation report printed after training

use std::fmt;

use serde::Serialize;

/// Counts of (true class, predicted class) pairs
///
/// Rows are true classes, columns are predicted classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn from_predictions(truth: &[usize], predicted: &[usize], n_classes: usize) -> Self {
        let mut counts = vec![vec![0; n_classes]; n_classes];
        for (&t, &p) in truth.iter().zip(predicted) {
            if t < n_classes && p < n_classes {
                counts[t][p] += 1;
            }
        }
        Self { counts }
    }

    pub fn n_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn get(&self, truth: usize, predicted: usize) -> usize {
        self.counts
            .get(truth)
            .and_then(|row| row.get(predicted))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.n_classes()).map(|c| self.get(c, c)).sum()
    }

    fn row_sum(&self, class: usize) -> usize {
        self.counts[class].iter().sum()
    }

    fn column_sum(&self, class: usize) -> usize {
        self.counts.iter().map(|row| row[class]).sum()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .counts
            .iter()
            .flatten()
            .map(|v| v.to_string().len())
            .max()
            .unwrap_or(1);
        for row in &self.counts {
            let cells: Vec<String> = row.iter().map(|v| format!("{:>width$}", v)).collect();
            writeln!(f, "[{}]", cells.join(" "))?;
        }
        Ok(())
    }
}

/// Precision, recall and F1 for one class or one average
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ClassMetrics {
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub support: usize,
}

fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        0.0
    } else {
        num as f32 / den as f32
    }
}

fn f1(precision: f32, recall: f32) -> f32 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Per-class metrics plus accuracy, macro and weighted averages
///
/// Undefined ratios (no predictions or no support for a class) are reported
/// as 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub classes: Vec<String>,
    pub per_class: Vec<ClassMetrics>,
    pub accuracy: f32,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
    pub confusion: ConfusionMatrix,
}

impl ClassificationReport {
    pub fn new(classes: &[String], truth: &[usize], predicted: &[usize]) -> Self {
        let confusion = ConfusionMatrix::from_predictions(truth, predicted, classes.len());

        let per_class: Vec<ClassMetrics> = (0..classes.len())
            .map(|c| {
                let tp = confusion.get(c, c);
                let precision = ratio(tp, confusion.column_sum(c));
                let recall = ratio(tp, confusion.row_sum(c));
                ClassMetrics {
                    precision,
                    recall,
                    f1: f1(precision, recall),
                    support: confusion.row_sum(c),
                }
            })
            .collect();

        let total = confusion.total();
        let n = per_class.len().max(1) as f32;
        let macro_avg = ClassMetrics {
            precision: per_class.iter().map(|m| m.precision).sum::<f32>() / n,
            recall: per_class.iter().map(|m| m.recall).sum::<f32>() / n,
            f1: per_class.iter().map(|m| m.f1).sum::<f32>() / n,
            support: total,
        };

        let weight = |m: &ClassMetrics| if total == 0 { 0.0 } else { m.support as f32 / total as f32 };
        let weighted_avg = ClassMetrics {
            precision: per_class.iter().map(|m| m.precision * weight(m)).sum(),
            recall: per_class.iter().map(|m| m.recall * weight(m)).sum(),
            f1: per_class.iter().map(|m| m.f1 * weight(m)).sum(),
            support: total,
        };

        Self {
            classes: classes.to_vec(),
            per_class,
            accuracy: ratio(confusion.correct(), total),
            macro_avg,
            weighted_avg,
            confusion,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_width = self
            .classes
            .iter()
            .map(String::len)
            .chain(["weighted avg".len()])
            .max()
            .unwrap_or(12);

        writeln!(
            f,
            "{:>name_width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for (name, m) in self.classes.iter().zip(&self.per_class) {
            writeln!(
                f,
                "{:>name_width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, m.precision, m.recall, m.f1, m.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>name_width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        for (label, m) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>name_width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                label, m.precision, m.recall, m.f1, m.support
            )?;
        }
        writeln!(f)?;
        writeln!(f, "Confusion matrix:")?;
        write!(f, "{}", self.confusion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("c{i}")).collect()
    }

    #[test]
    fn test_confusion_matrix_rows_are_truth() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1, 1, 1], &[0, 1, 1, 1, 0], 2);
        assert_eq!(cm.counts, vec![vec![1, 1], vec![1, 2]]);
        assert_eq!(cm.total(), 5);
        assert_eq!(cm.correct(), 3);
    }

    #[test]
    fn test_report_values() {
        // class 0: tp=1, fp=1, fn=1 ; class 1: tp=2, fp=1, fn=1
        let report = ClassificationReport::new(&names(2), &[0, 0, 1, 1, 1], &[0, 1, 1, 1, 0]);

        assert!((report.per_class[0].precision - 0.5).abs() < 1e-6);
        assert!((report.per_class[0].recall - 0.5).abs() < 1e-6);
        assert!((report.per_class[1].precision - 2.0 / 3.0).abs() < 1e-6);
        assert!((report.per_class[1].recall - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(report.per_class[1].support, 3);
        assert!((report.accuracy - 0.6).abs() < 1e-6);

        let expected_weighted = 0.5 * 0.4 + (2.0 / 3.0) * 0.6;
        assert!((report.weighted_avg.f1 - expected_weighted).abs() < 1e-5);
    }

    #[test]
    fn test_class_never_predicted_reports_zero() {
        let report = ClassificationReport::new(&names(3), &[0, 1, 2], &[0, 0, 0]);
        assert_eq!(report.per_class[1].precision, 0.0);
        assert_eq!(report.per_class[2].f1, 0.0);
    }

    #[test]
    fn test_display_contains_table_and_matrix() {
        let report = ClassificationReport::new(
            &["dog_bark".to_string(), "siren".to_string()],
            &[0, 1],
            &[0, 1],
        );
        let text = report.to_string();
        assert!(text.contains("precision"));
        assert!(text.contains("dog_bark"));
        assert!(text.contains("weighted avg"));
        assert!(text.contains("Confusion matrix:"));
        assert!(text.contains("[1 0]"));
    }

    #[test]
    fn test_empty_validation() {
        let report = ClassificationReport::new(&names(2), &[], &[]);
        assert_eq!(report.accuracy, 0.0);
        assert_eq!(report.confusion.total(), 0);
    }
}
