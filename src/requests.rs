use crate::address;
use std::collections::{HashMap, HashSet};

/// An outstanding cache-line request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub line_addr: address,
    pub set: usize,
}

/// Time-indexed queues of outstanding requests for one cache set.
///
/// Requests are keyed by arrival time and drained in insertion order.
/// The unique-address index exists for MSHR accounting: a line queued
/// twice occupies a single miss-status register.
#[derive(Debug, Clone, Default)]
pub struct Requests {
    by_arrival: HashMap<u64, Vec<Request>>,
    unique: HashSet<address>,
}

impl Requests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, line_addr: address, arrival_time: u64, set: usize) {
        self.by_arrival
            .entry(arrival_time)
            .or_default()
            .push(Request { line_addr, set });
        self.unique.insert(line_addr);
    }

    /// Number of unique outstanding line addresses.
    #[must_use]
    pub fn num_unique(&self) -> usize {
        self.unique.len()
    }

    #[must_use]
    pub fn has_requests(&self, time: u64) -> bool {
        self.by_arrival.get(&time).is_some_and(|queue| !queue.is_empty())
    }

    /// Take all requests arriving at `time`, releasing their addresses
    /// from the unique index.
    pub fn take_requests(&mut self, time: u64) -> Vec<Request> {
        let current = self.by_arrival.remove(&time).unwrap_or_default();
        for request in &current {
            self.unique.remove(&request.line_addr);
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::Requests;

    #[test]
    fn requests_drain_in_insertion_order() {
        let mut requests = Requests::new();
        requests.add(10, 5, 0);
        requests.add(20, 5, 0);
        requests.add(30, 7, 0);

        assert!(requests.has_requests(5));
        assert!(!requests.has_requests(6));
        let drained = requests.take_requests(5);
        assert_eq!(
            drained.iter().map(|r| r.line_addr).collect::<Vec<_>>(),
            vec![10, 20]
        );
        assert!(!requests.has_requests(5));
        assert!(requests.has_requests(7));
    }

    #[test]
    fn duplicate_lines_occupy_one_mshr() {
        let mut requests = Requests::new();
        requests.add(42, 1, 0);
        requests.add(42, 2, 0);
        requests.add(43, 2, 0);
        assert_eq!(requests.num_unique(), 2);
    }

    #[test]
    fn draining_releases_the_unique_addresses() {
        let mut requests = Requests::new();
        requests.add(42, 1, 0);
        requests.add(43, 1, 0);
        requests.take_requests(1);
        assert_eq!(requests.num_unique(), 0);
    }

    #[test]
    fn draining_a_time_without_requests_is_empty() {
        let mut requests = Requests::new();
        assert!(requests.take_requests(99).is_empty());
    }
}
