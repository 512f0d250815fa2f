//! Aggregated result of one send call and its mapping to an exit code.

use std::io::{self, Write};

use crate::dispatcher::DeliveryOutcome;

#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// Number of recipients the call was made for.
    pub expected: usize,
    pub outcomes: Vec<DeliveryOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    AllDelivered,
    Partial,
    AllFailed,
    /// Outcome count differs from the recipient count: a delivery task was lost.
    CountMismatch { expected: usize, observed: usize },
}

impl Verdict {
    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::AllDelivered => 0,
            Verdict::Partial => 1,
            Verdict::AllFailed | Verdict::CountMismatch { .. } => 2,
        }
    }
}

impl DispatchReport {
    pub fn new(expected: usize, outcomes: Vec<DeliveryOutcome>) -> Self {
        Self { expected, outcomes }
    }

    /// Fold the report of another send call into this one.
    pub fn absorb(&mut self, other: DispatchReport) {
        self.expected += other.expected;
        self.outcomes.extend(other.outcomes);
    }

    pub fn delivered(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_delivered())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes.iter().filter(|o| !o.status.is_delivered())
    }

    pub fn verdict(&self) -> Verdict {
        let observed = self.outcomes.len();
        let delivered = self.delivered().count();
        if observed != self.expected {
            Verdict::CountMismatch {
                expected: self.expected,
                observed,
            }
        } else if delivered == observed {
            Verdict::AllDelivered
        } else if delivered == 0 {
            Verdict::AllFailed
        } else {
            Verdict::Partial
        }
    }
}

/// Print the summary for `report` and return the process exit code.
pub fn render(out: &mut impl Write, report: &DispatchReport, print_success: bool) -> io::Result<i32> {
    let verdict = report.verdict();
    match verdict {
        Verdict::AllDelivered => {
            if print_success {
                writeln!(out, "all packages successfully delivered")?;
            }
        }
        Verdict::Partial => {
            if print_success {
                writeln!(out, "some packages successfully delivered:")?;
                for outcome in report.delivered() {
                    writeln!(out, "{}", outcome)?;
                }
            }
            writeln!(out, "some packages are not delivered:")?;
            for outcome in report.failed() {
                writeln!(out, "{}", outcome)?;
            }
        }
        Verdict::AllFailed => {
            writeln!(out, "errors by sending all packages:")?;
            for outcome in report.failed() {
                writeln!(out, "{}", outcome)?;
            }
        }
        Verdict::CountMismatch { expected, observed } => {
            writeln!(
                out,
                "!!! amount of outcomes ({}) is not equal to amount of recipients ({}) !!!",
                observed, expected
            )?;
            writeln!(out, "success:")?;
            for outcome in report.delivered() {
                writeln!(out, "{}", outcome)?;
            }
            writeln!(out, "failure:")?;
            for outcome in report.failed() {
                writeln!(out, "{}", outcome)?;
            }
        }
    }
    Ok(verdict.exit_code())
}
