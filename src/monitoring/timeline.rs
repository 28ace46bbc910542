//! Execution Timeline
//!
//! Tracks when each step visit starts and how it ends, for timing
//! reports and an ASCII Gantt chart. A step that branches back to itself
//! produces one visit per execution.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Events retained before the oldest are discarded.
const MAX_EVENTS: usize = 4096;

/// Rows drawn by [`ExecutionTimeline::gantt_chart`].
const MAX_CHART_ROWS: usize = 40;

const CHART_WIDTH: f64 = 50.0;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Step was handed to the dispatcher
    Started,
    /// Dispatcher reported success
    Succeeded,
    /// Dispatcher reported failure
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub step_id: u32,
    pub label: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// One execution of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepVisit {
    pub step_id: u32,
    pub label: String,
    pub start_ms: u128,
    /// `None` while the step is still running or was cancelled mid-action
    pub end_ms: Option<u128>,
    pub succeeded: Option<bool>,
}

/// Totals for one step id across a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepTiming {
    pub visits: u32,
    pub failures: u32,
    pub total_ms: u128,
}

/// Tracks the execution timeline of one run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Drops all events and restarts the clock.
    pub fn reset(&mut self) {
        self.events.clear();
        self.start_time = Instant::now();
    }

    /// Records an event for a step.
    pub fn record(&mut self, step_id: u32, label: impl Into<String>, event_type: EventType) {
        if self.events.len() >= MAX_EVENTS {
            self.events.drain(..MAX_EVENTS / 4);
        }
        self.events.push(TimelineEvent {
            step_id,
            label: label.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Returns the total elapsed time since the timeline was (re)started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn offset_ms(&self, at: Instant) -> u128 {
        at.saturating_duration_since(self.start_time).as_millis()
    }

    /// Pairs each `Started` event with the outcome that follows it.
    pub fn visits(&self) -> Vec<StepVisit> {
        let mut visits: Vec<StepVisit> = Vec::new();

        for event in &self.events {
            let at = self.offset_ms(event.timestamp);
            match event.event_type {
                EventType::Started => visits.push(StepVisit {
                    step_id: event.step_id,
                    label: event.label.clone(),
                    start_ms: at,
                    end_ms: None,
                    succeeded: None,
                }),
                EventType::Succeeded | EventType::Failed => {
                    let open = visits
                        .iter_mut()
                        .rev()
                        .find(|v| v.step_id == event.step_id && v.end_ms.is_none());
                    if let Some(visit) = open {
                        visit.end_ms = Some(at);
                        visit.succeeded = Some(event.event_type == EventType::Succeeded);
                    }
                }
            }
        }

        visits
    }

    /// Aggregates finished visits per step id.
    pub fn step_timings(&self) -> BTreeMap<u32, StepTiming> {
        let mut timings: BTreeMap<u32, StepTiming> = BTreeMap::new();

        for visit in self.visits() {
            let timing = timings.entry(visit.step_id).or_default();
            timing.visits += 1;
            if visit.succeeded == Some(false) {
                timing.failures += 1;
            }
            if let Some(end) = visit.end_ms {
                timing.total_ms += end - visit.start_ms;
            }
        }

        timings
    }

    /// Generates an ASCII Gantt chart, one row per visit.
    ///
    /// Long runs only show the most recent visits.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }

        let scale = CHART_WIDTH / total_time as f64;
        let visits = self.visits();
        let skipped = visits.len().saturating_sub(MAX_CHART_ROWS);
        if skipped > 0 {
            output.push_str(&format!("  ... {} earlier visits omitted\n", skipped));
        }

        for visit in visits.iter().skip(skipped) {
            let end = visit.end_ms.unwrap_or(total_time);
            let start_pos = (visit.start_ms as f64 * scale) as usize;
            let width = ((end.saturating_sub(visit.start_ms)) as f64 * scale).max(1.0) as usize;

            let mark = match visit.succeeded {
                Some(true) => "#",
                Some(false) => "x",
                None => ".",
            };
            let mut bar = " ".repeat(start_pos);
            bar.push_str(&mark.repeat(width));

            output.push_str(&format!(
                "{} |{}| ({} ms)\n",
                truncate(&format!("[{}] {}", visit.step_id, visit.label), 16),
                bar,
                end.saturating_sub(visit.start_ms)
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or shortens a label to exactly `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.events().is_empty());
        assert!(timeline.visits().is_empty());
    }

    #[test]
    fn test_visit_pairs_start_and_outcome() {
        let mut timeline = ExecutionTimeline::new();
        timeline.record(1, "open", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.record(1, "open", EventType::Succeeded);

        let visits = timeline.visits();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].succeeded, Some(true));
        assert!(visits[0].end_ms.unwrap() - visits[0].start_ms >= 20);
    }

    #[test]
    fn test_repeated_step_counts_each_visit() {
        let mut timeline = ExecutionTimeline::new();
        for outcome in [EventType::Failed, EventType::Failed, EventType::Succeeded] {
            timeline.record(3, "tap", EventType::Started);
            timeline.record(3, "tap", outcome);
        }

        let timings = timeline.step_timings();
        let tap = timings.get(&3).unwrap();
        assert_eq!(tap.visits, 3);
        assert_eq!(tap.failures, 2);
    }

    #[test]
    fn test_unfinished_visit() {
        let mut timeline = ExecutionTimeline::new();
        timeline.record(5, "swipe", EventType::Started);

        let visits = timeline.visits();
        assert_eq!(visits[0].end_ms, None);
        assert_eq!(visits[0].succeeded, None);
        assert_eq!(timeline.step_timings().get(&5).unwrap().total_ms, 0);
    }

    #[test]
    fn test_outcome_without_start_is_ignored() {
        let mut timeline = ExecutionTimeline::new();
        timeline.record(2, "stray", EventType::Succeeded);
        assert!(timeline.visits().is_empty());
    }

    #[test]
    fn test_reset() {
        let mut timeline = ExecutionTimeline::new();
        timeline.record(1, "open", EventType::Started);
        timeline.reset();
        assert!(timeline.events().is_empty());
    }

    #[test]
    fn test_timeline_elapsed() {
        let timeline = ExecutionTimeline::new();
        thread::sleep(Duration::from_millis(50));
        assert!(timeline.elapsed().as_millis() >= 50);
    }

    #[test]
    fn test_gantt_chart_generation() {
        let mut timeline = ExecutionTimeline::new();

        timeline.record(1, "open", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.record(1, "open", EventType::Succeeded);

        timeline.record(3, "tap", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.record(3, "tap", EventType::Failed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("[1] open"));
        assert!(chart.contains("[3] tap"));
        assert!(chart.contains('x'));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_gantt_chart_limits_rows() {
        let mut timeline = ExecutionTimeline::new();
        for _ in 0..(MAX_CHART_ROWS + 5) {
            timeline.record(1, "spin", EventType::Started);
            timeline.record(1, "spin", EventType::Failed);
        }
        thread::sleep(Duration::from_millis(5));

        let chart = timeline.gantt_chart();
        assert!(chart.contains("5 earlier visits omitted"));
        assert_eq!(chart.matches("[1] spin").count(), MAX_CHART_ROWS);
    }

    #[test]
    fn test_event_buffer_is_bounded() {
        let mut timeline = ExecutionTimeline::new();
        for _ in 0..(MAX_EVENTS + 10) {
            timeline.record(1, "spin", EventType::Started);
        }
        assert!(timeline.events().len() <= MAX_EVENTS);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc  ");
        assert_eq!(truncate("abcdefgh", 6), "abc...");
        assert_eq!(truncate("步骤步骤步骤步骤", 6).chars().count(), 6);
    }
}
