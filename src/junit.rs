use junit_report::{Duration, ReportBuilder, TestCaseBuilder, TestSuiteBuilder};
use prettytable::{Cell, Row, Table};
use std::path::Path;

use crate::error::TbError;
use crate::test::TestOutcome;
use crate::SimpleResult;

pub(crate) fn create_junit_xml(
    suite: &str,
    outcomes: &[TestOutcome],
    dir: &Path,
) -> SimpleResult<()> {
    let mut test_cases = Vec::new();

    for t in outcomes {
        let duration = Duration::seconds_f64(t.time_secs);
        let tc = if t.passed {
            TestCaseBuilder::success(&t.name, duration)
        } else {
            TestCaseBuilder::failure(&t.name, duration, "failure", &t.message)
        }
        .build();
        test_cases.push(tc);
    }

    let test_suite = TestSuiteBuilder::new(suite)
        .add_testcases(test_cases)
        .build();
    let report = ReportBuilder::new().add_testsuite(test_suite).build();
    std::fs::create_dir_all(dir)?;
    let file = std::fs::File::create(dir.join("results.xml"))?;
    report
        .write_xml(file)
        .map_err(|e| TbError::Report(format!("{:?}", e)))
}

pub(crate) fn summary_table(outcomes: &[TestOutcome]) -> Table {
    let mut table = Table::new();
    table.set_titles(Row::new(
        ["TEST", "RESULT", "TIME (s)", "SIM TIME (ns)", "SIM SPEED (ns/s)"]
            .iter()
            .map(|t| Cell::new(t))
            .collect(),
    ));
    for t in outcomes {
        let sim_speed = if t.time_secs > 0.0 {
            t.sim_time_ns / t.time_secs
        } else {
            0.0
        };
        table.add_row(Row::new(vec![
            Cell::new(&t.name),
            Cell::new(if t.passed { "passed" } else { "failed" }),
            Cell::new(&format!("{:.3}", t.time_secs)),
            Cell::new(&format!("{:.0}", t.sim_time_ns)),
            Cell::new(&format!("{:.3}", sim_speed)),
        ]));
    }
    table
}
