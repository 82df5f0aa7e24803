// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::Symbol;
use log::trace;

/// Fixed-size record of the last symbols an agent transmitted.
#[derive(Clone, Debug)]
pub struct WordHistory {
    /// Circular buffer holding the transmitted symbols.
    buffer: Vec<Symbol>,

    /// The write pointer into the circular buffer; the oldest entry once the
    /// buffer is full.
    write_idx: usize,

    /// The number of valid symbols in the buffer.
    occupancy: usize,
}

impl WordHistory {
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "History depth must be positive.");
        Self {
            buffer: vec![Symbol::default(); depth],
            write_idx: 0,
            occupancy: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.occupancy
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy == 0
    }

    /// Record a transmitted symbol, evicting the oldest one once full.
    pub fn push(&mut self, symbol: Symbol) {
        self.buffer[self.write_idx] = symbol;
        self.write_idx = (self.write_idx + 1) % self.buffer.len();
        if self.occupancy < self.buffer.len() {
            self.occupancy += 1;
        }
        trace!(
            "history push {} write_idx: {}, occupancy: {}",
            symbol,
            self.write_idx,
            self.occupancy
        );
    }

    /// The symbol transmitted `ticks_ago` pushes back; `back(1)` is the most
    /// recent one. `None` when the history does not reach that far.
    pub fn back(&self, ticks_ago: usize) -> Option<Symbol> {
        if ticks_ago == 0 || ticks_ago > self.occupancy {
            return None;
        }
        let len = self.buffer.len();
        Some(self.buffer[(self.write_idx + len - ticks_ago) % len])
    }

    /// Symbols from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = Symbol> + '_ {
        (1..=self.occupancy)
            .rev()
            .filter_map(move |ticks_ago| self.back(ticks_ago))
    }
}

// Counter that wraps around on limit value. E.g., if limit = 3, then the count
// sequence is 0, 1, 2, 0, 1, 2, ...
#[derive(Clone, Debug)]
pub(crate) struct WrapAroundCounter {
    value: usize,
    limit: usize,
}

impl WrapAroundCounter {
    pub(crate) fn new(limit: usize) -> Self {
        assert!(limit > 0);
        Self { value: 0, limit }
    }

    pub(crate) fn value(&self) -> usize {
        self.value
    }

    pub(crate) fn advance(&mut self) {
        self.value = if self.value + 1 == self.limit {
            0
        } else {
            self.value + 1
        };
    }

    pub(crate) fn test(&self) -> bool {
        self.value == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode_idle, encode_trigger};

    #[test]
    fn test_history_back() {
        let mut history = WordHistory::new(4);
        assert!(history.is_empty());
        assert_eq!(history.back(1), None);
        history.push(encode_idle(0, 0));
        history.push(encode_trigger(3));
        assert_eq!(history.len(), 2);
        assert_eq!(history.back(1), Some(encode_trigger(3)));
        assert_eq!(history.back(2), Some(encode_idle(0, 0)));
        assert_eq!(history.back(3), None);
        assert_eq!(history.back(0), None);
    }

    #[test]
    fn test_history_wraps() {
        let mut history = WordHistory::new(3);
        for offset in 0..5 {
            history.push(encode_trigger(offset));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.capacity(), 3);
        assert_eq!(history.back(1), Some(encode_trigger(4)));
        assert_eq!(history.back(3), Some(encode_trigger(2)));
        assert_eq!(history.back(4), None);
        let oldest_first: Vec<Symbol> = history.iter().collect();
        assert_eq!(
            oldest_first,
            vec![encode_trigger(2), encode_trigger(3), encode_trigger(4)]
        );
    }

    #[test]
    #[should_panic]
    fn test_history_zero_depth_panics() {
        WordHistory::new(0);
    }

    #[test]
    fn test_wrap_around_counter() {
        let mut counter = WrapAroundCounter::new(4);
        let values: Vec<usize> = (0..6)
            .map(|_| {
                let value = counter.value();
                counter.advance();
                value
            })
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 0, 1]);
        assert!(!counter.test());
    }
}
