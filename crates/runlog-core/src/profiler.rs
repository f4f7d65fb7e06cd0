//! Measurement sources whose readings land in outcome rows.
//!
//! A profiler is started around the code under test and hands back a
//! [`Record`] that [`OutcomeBuilder::record`](crate::OutcomeBuilder::record)
//! appends to the pending row.

use crate::value::Record;
use runlog_common::Timer;
use serde::Serialize;
use std::ops::AddAssign;

pub trait Profiler {
    type Snapshot;

    fn start(&mut self);

    /// Stop measuring and return the reading accumulated so far.
    fn stop(&mut self) -> Self::Snapshot;

    /// Current reading without stopping.
    fn snapshot(&self) -> Self::Snapshot;

    fn to_record(&self) -> Record;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ElapsedSnapshot {
    pub elapsed_ns: u64,
}

impl AddAssign for ElapsedSnapshot {
    fn add_assign(&mut self, rhs: Self) {
        self.elapsed_ns = self.elapsed_ns.saturating_add(rhs.elapsed_ns);
    }
}

impl From<ElapsedSnapshot> for Record {
    fn from(s: ElapsedSnapshot) -> Self {
        let mut record = Record::new();
        record.add("elapsed_ns", s.elapsed_ns);
        record
    }
}

/// Wall-clock profiler. `start` resets, so repeated start/stop pairs measure
/// independent intervals.
#[derive(Debug, Default)]
pub struct ElapsedProfiler {
    timer: Timer,
}

impl ElapsedProfiler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Profiler for ElapsedProfiler {
    type Snapshot = ElapsedSnapshot;

    fn start(&mut self) {
        self.timer.start();
    }

    fn stop(&mut self) -> ElapsedSnapshot {
        self.timer.stop();
        self.snapshot()
    }

    fn snapshot(&self) -> ElapsedSnapshot {
        ElapsedSnapshot {
            elapsed_ns: self.timer.nanoseconds(),
        }
    }

    fn to_record(&self) -> Record {
        self.snapshot().into()
    }
}
