pub(crate) mod flags;
pub(crate) mod install;
pub(crate) mod lifecycle;
pub(crate) mod run;
pub(crate) mod sync;

use machine_driver_agent::SyncReport;

pub(crate) fn print_report(report: &SyncReport) {
    println!("published: {}", report.published.join(", "));
    if !report.activated.is_empty() {
        println!("activated: {}", report.activated.join(", "));
    }
    if !report.torn_down.is_empty() {
        println!("torn down: {}", report.torn_down.join(", "));
    }
    for failure in &report.failures {
        eprintln!("failed: {failure}");
    }
}
