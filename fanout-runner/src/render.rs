//! Console rendering of the catalog and the final report.

use std::io::{self, Write};

use fanout_engine::report::{Recommendation, Verdict};
use fanout_engine::{Report, TaskCatalog, VerdictLevel};
use yansi::Paint;

const RULE: &str = "================================================================================";
const THIN_RULE: &str = "--------------------------------------------------------------------------------";

/// Prints the weighted task table with selection probabilities.
pub fn catalog(out: &mut impl Write, catalog: &TaskCatalog) -> io::Result<()> {
    writeln!(out, "{}", "TASK CATALOG".bold())?;
    writeln!(out, "{THIN_RULE}")?;
    for entry in catalog.entries() {
        let probability = catalog.probability(entry.name()).unwrap_or(0.0) * 100.0;
        write!(
            out,
            "{:<40} | weight {:>3} | {:>6.2}%",
            entry.name(),
            entry.weight(),
            probability
        )?;
        if let Some(threshold) = entry.threshold() {
            write!(out, " | slow > {threshold:.1?}")?;
        }
        writeln!(out)?;
    }
    writeln!(out, "{THIN_RULE}")?;
    writeln!(out, "total weight: {}", catalog.total_weight().bold())
}

/// Prints the end-of-run report.
pub fn report(out: &mut impl Write, report: &Report) -> io::Result<()> {
    let totals = &report.totals;

    writeln!(out)?;
    writeln!(out, "{RULE}")?;
    writeln!(out, "{}", "PERFORMANCE TEST RESULTS".bold())?;
    writeln!(out, "{RULE}")?;
    writeln!(out, "Total Requests:       {}", totals.requests.bold())?;
    if totals.failures > 0 {
        writeln!(out, "Total Failures:       {}", totals.failures.bold().red())?;
    } else {
        writeln!(out, "Total Failures:       {}", totals.failures)?;
    }
    writeln!(
        out,
        "Failure Rate:         {:.2}%",
        totals.failure_rate * 100.0
    )?;
    writeln!(out, "Avg Response Time:    {} ms", opt_ms(totals.avg_ms))?;
    writeln!(out, "Min Response Time:    {} ms", opt_ms(totals.min_ms))?;
    writeln!(out, "Max Response Time:    {} ms", opt_ms(totals.max_ms))?;
    writeln!(
        out,
        "Requests/Second:      {:.2}",
        totals.requests_per_second
    )?;
    writeln!(out, "{RULE}")?;

    writeln!(out)?;
    writeln!(out, "{}", "SLOWEST ENDPOINTS".bold())?;
    writeln!(out, "{THIN_RULE}")?;
    for op in &report.slowest {
        writeln!(
            out,
            "{:<48} | Avg: {:>8.2}ms | P95: {:>8.2}ms | Max: {:>8.2}ms",
            op.name, op.avg_ms, op.p95_ms, op.max_ms
        )?;
    }
    writeln!(out, "{RULE}")?;

    if !report.verdicts.is_empty() {
        writeln!(out)?;
        writeln!(out, "{}", "N+1 PROBLEM ANALYSIS".bold())?;
        writeln!(out, "{THIN_RULE}")?;
        for verdict in &report.verdicts {
            print_verdict(out, verdict)?;
        }
    }

    let business = &report.business;
    writeln!(out)?;
    writeln!(out, "{}", "BUSINESS METRICS".bold())?;
    writeln!(out, "{THIN_RULE}")?;
    writeln!(out, "Users Registered:     {}", business.users_registered)?;
    writeln!(out, "Orders Created:       {}", business.orders_created)?;
    writeln!(out, "Payments Processed:   {}", business.payments_processed)?;
    writeln!(out, "Abandoned Carts:      {}", business.abandoned_carts)?;
    match business.abandonment_rate {
        Some(rate) => writeln!(out, "Abandonment Rate:     {:.2}%", rate * 100.0)?,
        None => writeln!(out, "Abandonment Rate:     n/a")?,
    }

    if !report.recommendations.is_empty() {
        writeln!(out)?;
        writeln!(out, "{}", "RECOMMENDATIONS".bold())?;
        writeln!(out, "{THIN_RULE}")?;
        for recommendation in &report.recommendations {
            print_recommendation(out, recommendation)?;
        }
    }

    writeln!(out, "{RULE}")
}

fn print_verdict(out: &mut impl Write, verdict: &Verdict) -> io::Result<()> {
    writeln!(out, "{}", verdict.operation.bold())?;
    writeln!(
        out,
        "  Requests: {} | Failures: {}",
        verdict.requests, verdict.failures
    )?;
    writeln!(
        out,
        "  Avg: {:.2}ms | P95: {:.2}ms | Max: {:.2}ms",
        verdict.avg_ms, verdict.p95_ms, verdict.max_ms
    )?;
    match verdict.level {
        VerdictLevel::Critical => writeln!(
            out,
            "  {} avg > {:.0}ms, severe N+1 problem",
            "CRITICAL:".bold().red(),
            verdict.critical_ms
        ),
        VerdictLevel::Warning => writeln!(
            out,
            "  {} avg > {:.0}ms, N+1 problem detected",
            "WARNING:".bold().yellow(),
            verdict.warning_ms
        ),
        VerdictLevel::Acceptable => {
            writeln!(out, "  {} performance acceptable", "OK:".bold().green())
        }
    }
}

fn print_recommendation(out: &mut impl Write, recommendation: &Recommendation) -> io::Result<()> {
    match recommendation {
        Recommendation::BatchFetching { operations } => {
            writeln!(
                out,
                "* Fetch related entities in batches or cache them for: {}",
                operations.join(", ")
            )
        }
        Recommendation::InspectServiceLogs { failure_rate } => writeln!(
            out,
            "* {:.2}% of requests failed, inspect the service logs",
            failure_rate * 100.0
        ),
        Recommendation::CheckSeedData { operations } => writeln!(
            out,
            "* Create calls failed, check that the seed data exists: {}",
            operations.join(", ")
        ),
    }
}

fn opt_ms(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_owned(), |ms| format!("{ms:.2}"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use fanout_engine::{MetricSample, ReportBuilder, StatsAggregator, ThresholdClass};

    use super::*;

    fn render<F>(f: F) -> String
    where
        F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
    {
        yansi::disable();
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn renders_report() {
        let stats = StatsAggregator::new();
        for _ in 0..4 {
            stats.ingest(MetricSample::new(
                "[N+1] GET All Carts",
                Duration::from_millis(1_500),
                true,
            ));
        }
        stats.ingest(MetricSample::new(
            "[CREATE] POST Cart",
            Duration::from_millis(20),
            false,
        ));

        let report = ReportBuilder::new(10)
            .flag(ThresholdClass::new(
                "[N+1] GET All Carts",
                Duration::from_millis(500),
                Duration::from_secs(1),
            ))
            .build(&stats.snapshot());
        let output = render(|out| super::report(out, &report));

        assert!(output.contains("Total Requests:       5"));
        assert!(output.contains("Failure Rate:         20.00%"));
        assert!(output.contains("CRITICAL: avg > 1000ms"));
        assert!(output.contains("Abandonment Rate:     n/a"));
        assert!(output.contains("check that the seed data exists: [CREATE] POST Cart"));
    }

    #[test]
    fn renders_catalog() {
        let catalog = crate::catalog::build(&BTreeMap::new()).unwrap();
        let output = render(|out| super::catalog(out, &catalog));

        assert!(output.contains("[N+1] GET All Carts"));
        assert!(output.contains("21.01%"));
        assert!(output.contains("total weight: 238"));
    }
}
