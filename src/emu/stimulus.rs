//! Input stimulus for the simulated input lines.
//!
//! Real hardware sees edges on its input PHYs. Here edges are either
//! scheduled up front in an [`EdgeSchedule`] (at a cycle-relative timestamp,
//! in every cycle or in one cycle only) or injected one tick ahead through
//! [`crate::emu::EntanglerCore::drive_edge`].

use smallvec::SmallVec;

use crate::device::{ChannelId, Timestamp};

/// An input line of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputLine {
    /// Gated input signal `i`.
    Input(usize),
    /// Reference input.
    Reference,
}

impl InputLine {
    /// Line watched by a channel. Outputs have none.
    pub fn from_channel(channel: ChannelId) -> Option<Self> {
        match channel {
            ChannelId::Output(_) => None,
            ChannelId::Input(i) => Some(InputLine::Input(i)),
            ChannelId::Reference => Some(InputLine::Reference),
        }
    }
}

/// A rising edge seen during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub line: InputLine,
    pub time: Timestamp,
}

/// Edges of one tick, ordered by time.
pub type TickEdges = SmallVec<[Edge; 4]>;

/// A scheduled rising edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEdge {
    pub line: InputLine,
    /// Cycle-relative time of the edge.
    pub time: Timestamp,
    /// Only in this cycle index (`None`: every cycle).
    pub cycle: Option<u16>,
}

impl ScheduledEdge {
    fn fires_in(&self, cycle: u16) -> bool {
        self.cycle.map_or(true, |c| c == cycle)
    }
}

/// Edges scheduled against the cycle clock, sorted by time.
#[derive(Debug, Clone, Default)]
pub struct EdgeSchedule {
    edges: Vec<ScheduledEdge>,
}

impl EdgeSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge.
    pub fn push(&mut self, edge: ScheduledEdge) {
        let pos = self.edges.partition_point(|e| e.time <= edge.time);
        self.edges.insert(pos, edge);
    }

    /// Edge at `time` in every cycle.
    pub fn every_cycle(&mut self, line: InputLine, time: Timestamp) {
        self.push(ScheduledEdge { line, time, cycle: None });
    }

    /// Edge at `time` in cycle `cycle` only.
    pub fn in_cycle(&mut self, line: InputLine, cycle: u16, time: Timestamp) {
        self.push(ScheduledEdge { line, time, cycle: Some(cycle) });
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Edges falling in coarse tick `m` of cycle `cycle`.
    pub fn edges_at(&self, cycle: u16, m: u16) -> TickEdges {
        self.edges
            .iter()
            .filter(|e| e.time.coarse() == m && e.fires_in(cycle))
            .map(|e| Edge { line: e.line, time: e.time })
            .collect()
    }

    /// First coarse tick `>= from` of cycle `cycle` that has an edge.
    pub fn next_edge_tick(&self, cycle: u16, from: u16) -> Option<u16> {
        self.edges
            .iter()
            .filter(|e| e.fires_in(cycle))
            .map(|e| e.time.coarse())
            .find(|&m| m >= from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_sorted_by_time() {
        let mut schedule = EdgeSchedule::new();
        schedule.every_cycle(InputLine::Input(0), Timestamp::new(13));
        schedule.every_cycle(InputLine::Input(1), Timestamp::new(9));
        schedule.every_cycle(InputLine::Input(0), Timestamp::new(11));

        let edges = schedule.edges_at(0, 1);
        let times: Vec<u16> = edges.iter().map(|e| e.time.raw()).collect();
        assert_eq!(times, vec![9, 11, 13]);
    }

    #[test]
    fn test_cycle_filter() {
        let mut schedule = EdgeSchedule::new();
        schedule.in_cycle(InputLine::Input(0), 3, Timestamp::new(15));
        assert!(schedule.edges_at(2, 1).is_empty());
        assert_eq!(schedule.edges_at(3, 1).len(), 1);
        assert!(schedule.edges_at(3, 2).is_empty());
    }

    #[test]
    fn test_next_edge_tick() {
        let mut schedule = EdgeSchedule::new();
        schedule.every_cycle(InputLine::Reference, Timestamp::from_parts(10, 3));
        schedule.in_cycle(InputLine::Input(2), 5, Timestamp::from_parts(4, 0));

        assert_eq!(schedule.next_edge_tick(0, 0), Some(10));
        assert_eq!(schedule.next_edge_tick(5, 0), Some(4));
        assert_eq!(schedule.next_edge_tick(5, 5), Some(10));
        assert_eq!(schedule.next_edge_tick(0, 11), None);
    }
}
