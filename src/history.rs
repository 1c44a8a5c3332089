// src/history.rs - Rolling sample window feeding the chart
use std::collections::VecDeque;

/// Number of samples kept in the rolling window.
pub const HISTORY_CAPACITY: usize = 120;

/// One poll cycle's reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub temperature_c: f64,
    /// Heater duty, 0..100 %
    pub duty_percent: f64,
}

/// Fixed-capacity FIFO of readings. Appending past capacity evicts the oldest value.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    values: VecDeque<f64>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity + 1),
            capacity: capacity.max(1),
        }
    }

    /// Append a value at the tail
    pub fn push(&mut self, value: f64) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    /// Ordered contents, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Temperature and duty windows, always appended together so the renderer
/// can correlate them by index.
#[derive(Debug, Clone, Default)]
pub struct ChartHistory {
    temperature: SampleBuffer,
    duty: SampleBuffer,
}

impl ChartHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: Sample) {
        self.temperature.push(sample.temperature_c);
        self.duty.push(sample.duty_percent);
    }

    pub fn temperatures(&self) -> Vec<f64> {
        self.temperature.values()
    }

    pub fn duties(&self) -> Vec<f64> {
        self.duty.values()
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.temperature.len(), self.duty.len());
        self.temperature.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
