use std::collections::BTreeMap;
use std::io::{self, Write};

use rust_decimal::Decimal;

use crate::categorizing::categorizer::Stats;
use crate::data::ExportRecord;

const UNCATEGORIZED: &str = "(uncategorized)";
const UNASSIGNED: &str = "(nobody)";
const NAME_WIDTH: usize = 28;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CategoryTotal {
    pub count: usize,
    pub sum: Decimal,
}

/// Money totals over the exported rows.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub income: Decimal,
    pub expense: Decimal,
    pub by_category: BTreeMap<String, CategoryTotal>,
    pub by_person: BTreeMap<String, CategoryTotal>,
}

impl Summary {
    pub fn from_records(records: &[ExportRecord]) -> Summary {
        let mut summary = Summary::default();

        for record in records {
            if record.amount.is_sign_positive() {
                summary.income += record.amount;
            } else {
                summary.expense += record.amount;
            }

            let category = if record.category.is_empty() {
                UNCATEGORIZED
            } else {
                record.category.as_str()
            };
            add(&mut summary.by_category, category, record.amount);

            let person = if record.person.is_empty() {
                UNASSIGNED
            } else {
                record.person.as_str()
            };
            add(&mut summary.by_person, person, record.amount);
        }

        // Nobody was attributed anything, there is nothing to break down.
        if summary.by_person.keys().all(|person| person == UNASSIGNED) {
            summary.by_person.clear();
        }

        summary
    }

    pub fn balance(&self) -> Decimal {
        self.income + self.expense
    }
}

fn add(totals: &mut BTreeMap<String, CategoryTotal>, name: &str, amount: Decimal) {
    let total = totals.entry(name.to_string()).or_default();
    total.count += 1;
    total.sum += amount;
}

fn shorten(name: &str) -> String {
    if name.chars().count() > NAME_WIDTH {
        let head: String = name.chars().take(NAME_WIDTH - 3).collect();
        format!("{}...", head)
    } else {
        name.to_string()
    }
}

pub fn write_preview<W: Write>(out: &mut W, records: &[ExportRecord], count: usize) -> io::Result<()> {
    let count = count.min(records.len());
    writeln!(out)?;
    writeln!(out, "Preview (first {} rows):", count)?;
    writeln!(
        out,
        "{:<30} {:<16} {:>12} {:<10} {:<10} {:<8}",
        "Name", "Category", "Amount", "Date", "Person", "Source"
    )?;
    for record in records.iter().take(count) {
        writeln!(
            out,
            "{:<30} {:<16} {:>12.2} {:<10} {:<10} {:<8}",
            shorten(&record.name),
            record.category,
            record.amount,
            record.date,
            record.person,
            record.source
        )?;
    }
    Ok(())
}

pub fn write_statistics<W: Write>(out: &mut W, stats: &Stats, summary: &Summary) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "Transactions: {}", stats.total)?;
    writeln!(out, "  automatic:  {} ({} from rules)", stats.automatic(), stats.rule_hits)?;
    writeln!(out, "  manual:     {}", stats.manual)?;
    writeln!(out, "  skipped:    {}", stats.skipped)?;
    if stats.corrected > 0 {
        writeln!(out, "  corrected:  {}", stats.corrected)?;
    }

    writeln!(out)?;
    writeln!(out, "Income:  {:.2}", summary.income)?;
    writeln!(out, "Expense: {:.2}", summary.expense)?;
    writeln!(out, "Balance: {:.2}", summary.balance())?;

    writeln!(out)?;
    writeln!(out, "By category:")?;
    for (category, total) in &summary.by_category {
        writeln!(out, "  {:<20} {:>4}  {:>12.2}", category, total.count, total.sum)?;
    }

    if !summary.by_person.is_empty() {
        writeln!(out)?;
        writeln!(out, "By person:")?;
        for (person, total) in &summary.by_person {
            writeln!(out, "  {:<20} {:>4}  {:>12.2}", person, total.count, total.sum)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    fn record(name: &str, category: &str, amount: Decimal) -> ExportRecord {
        ExportRecord {
            name: name.to_string(),
            category: category.to_string(),
            amount,
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            person: String::new(),
            source: String::new(),
            merchant: name.to_string(),
            kind: String::new(),
        }
    }

    #[test]
    fn test_summary_totals() {
        let records = vec![
            record("Starbucks", "Dining", dec!(-12.50)),
            record("Starbucks", "Dining", dec!(-8.00)),
            record("Employer", "Salary", dec!(3000)),
            record("Unknown", "", dec!(-1)),
        ];
        let summary = Summary::from_records(&records);

        assert_eq!(summary.income, dec!(3000));
        assert_eq!(summary.expense, dec!(-21.50));
        assert_eq!(summary.balance(), dec!(2978.50));
        assert_eq!(
            summary.by_category.get("Dining"),
            Some(&CategoryTotal {
                count: 2,
                sum: dec!(-20.50)
            })
        );
        assert_eq!(summary.by_category.get(UNCATEGORIZED).map(|total| total.count), Some(1));
        assert!(summary.by_person.is_empty());
    }

    #[test]
    fn test_person_totals() -> Result<()> {
        let records = vec![
            ExportRecord {
                person: "Alex".to_string(),
                ..record("Starbucks", "Dining", dec!(-12.50))
            },
            ExportRecord {
                person: "Alex".to_string(),
                ..record("Metro", "Transport", dec!(-3))
            },
            ExportRecord {
                person: "Sam".to_string(),
                ..record("Employer", "Salary", dec!(3000))
            },
            record("Unknown", "", dec!(-1)),
        ];
        let summary = Summary::from_records(&records);

        assert_eq!(
            summary.by_person.get("Alex"),
            Some(&CategoryTotal {
                count: 2,
                sum: dec!(-15.50)
            })
        );
        assert_eq!(summary.by_person.get(UNASSIGNED).map(|total| total.count), Some(1));

        let mut out = Vec::new();
        write_statistics(&mut out, &Stats::default(), &summary)?;
        let text = String::from_utf8(out)?;
        assert!(text.contains("By person:"));
        assert!(text.contains("Sam"));

        Ok(())
    }

    #[test]
    fn test_preview_truncates_names() -> Result<()> {
        let records = vec![
            record("A merchant with a rather long name indeed", "Other", dec!(-1)),
            record("Second", "Other", dec!(-2)),
        ];
        let mut out = Vec::new();
        write_preview(&mut out, &records, 1)?;
        let text = String::from_utf8(out)?;

        assert!(text.contains("A merchant with a rather ..."));
        assert!(!text.contains("Second"));

        Ok(())
    }

    #[test]
    fn test_statistics_mention_counts() -> Result<()> {
        let stats = Stats {
            total: 3,
            rule_hits: 1,
            manual: 1,
            skipped: 1,
            ..Stats::default()
        };
        let summary = Summary::from_records(&[record("Starbucks", "Dining", dec!(-12.50))]);
        let mut out = Vec::new();
        write_statistics(&mut out, &stats, &summary)?;
        let text = String::from_utf8(out)?;

        assert!(text.contains("Transactions: 3"));
        assert!(text.contains("skipped:    1"));
        assert!(!text.contains("corrected"));
        assert!(text.contains("Dining"));

        Ok(())
    }
}
