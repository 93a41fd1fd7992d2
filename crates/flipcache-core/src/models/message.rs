use serde::{Deserialize, Serialize};

/// Progress of one install run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub cached: usize,
    pub total: usize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self { cached: 0, total }
    }

    pub fn record(&mut self, stored: usize) {
        self.cached += stored;
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.cached.min(self.total) * 100) / self.total) as u8
    }
}

/// Message posted from the worker to foreground pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    CacheProgress { cached: usize, total: usize },
    CacheComplete { total: usize },
}

impl From<Progress> for WorkerMessage {
    fn from(progress: Progress) -> Self {
        WorkerMessage::CacheProgress {
            cached: progress.cached,
            total: progress.total,
        }
    }
}

/// Message posted from a page to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    SkipWaiting,
}
