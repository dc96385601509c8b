use std::collections::VecDeque;

pub const TEMP_HISTORY_SIZE: usize = 300;
pub const MEMORY_HISTORY_SIZE: usize = 300;
pub const CPU_PERCENT_HISTORY_SIZE: usize = 60;

/// Short ring buffers derived from the latest readings.
#[derive(Debug, Clone)]
pub struct MetricsHistory {
    pub cpu_temp: VecDeque<f64>,
    pub memory_percent: VecDeque<f64>,
    pub cpu_percent: VecDeque<f64>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self {
            cpu_temp: VecDeque::with_capacity(TEMP_HISTORY_SIZE),
            memory_percent: VecDeque::with_capacity(MEMORY_HISTORY_SIZE),
            cpu_percent: VecDeque::with_capacity(CPU_PERCENT_HISTORY_SIZE),
        }
    }

    pub fn push_temp(&mut self, value: f64) {
        Self::push_value(&mut self.cpu_temp, value, TEMP_HISTORY_SIZE);
    }

    pub fn push_memory(&mut self, value: f64) {
        Self::push_value(&mut self.memory_percent, value, MEMORY_HISTORY_SIZE);
    }

    pub fn push_cpu(&mut self, value: f64) {
        Self::push_value(&mut self.cpu_percent, value, CPU_PERCENT_HISTORY_SIZE);
    }

    fn push_value<T>(queue: &mut VecDeque<T>, value: T, capacity: usize) {
        if queue.len() >= capacity {
            queue.pop_front();
        }
        queue.push_back(value);
    }

    pub fn temp_vec(&self) -> Vec<f64> {
        self.cpu_temp.iter().copied().collect()
    }

    pub fn memory_vec(&self) -> Vec<f64> {
        self.memory_percent.iter().copied().collect()
    }

    pub fn cpu_vec(&self) -> Vec<f64> {
        self.cpu_percent.iter().copied().collect()
    }
}

impl Default for MetricsHistory {
    fn default() -> Self {
        Self::new()
    }
}
