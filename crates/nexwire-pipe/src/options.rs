use crate::error::{PipeError, Result};

/// Flow-control settings applied to every pipe on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeOptions {
    /// Largest chunk sent in one `PipeWrite` frame.
    pub flush_chunk_size: usize,
    /// Unacknowledged bytes above which writes pause.
    pub high_water_mark: usize,
    /// Unacknowledged bytes at or below which paused writes resume.
    pub low_water_mark: usize,
    /// Buffered plus unacknowledged bytes beyond which writes fail.
    pub high_water_cutoff: usize,
}

impl PipeOptions {
    pub const DEFAULT_FLUSH_CHUNK_SIZE: usize = 8 * 1024;
    pub const DEFAULT_HIGH_WATER_MARK: usize = 192 * 1024;
    pub const DEFAULT_LOW_WATER_MARK: usize = 16 * 1024;
    pub const DEFAULT_HIGH_WATER_CUTOFF: usize = 1024 * 1024;

    pub const MIN_FLUSH_CHUNK_SIZE: usize = 64;
    pub const MAX_FLUSH_CHUNK_SIZE: usize = 1024 * 1024;
    pub const MAX_HIGH_WATER_MARK: usize = 64 * 1024 * 1024;
    pub const MAX_LOW_WATER_MARK: usize = 64 * 1024 * 1024;
    pub const MAX_HIGH_WATER_CUTOFF: usize = 256 * 1024 * 1024;

    /// Check ranges and `cutoff >= high >= low`.
    pub fn validate(&self) -> Result<()> {
        check_range(
            "flush_chunk_size",
            self.flush_chunk_size,
            Self::MIN_FLUSH_CHUNK_SIZE,
            Self::MAX_FLUSH_CHUNK_SIZE,
        )?;
        check_range(
            "high_water_mark",
            self.high_water_mark,
            1,
            Self::MAX_HIGH_WATER_MARK,
        )?;
        check_range(
            "low_water_mark",
            self.low_water_mark,
            0,
            Self::MAX_LOW_WATER_MARK,
        )?;
        check_range(
            "high_water_cutoff",
            self.high_water_cutoff,
            1,
            Self::MAX_HIGH_WATER_CUTOFF,
        )?;

        if self.high_water_mark < self.low_water_mark {
            return Err(PipeError::InvalidOptions(format!(
                "high_water_mark ({}) must be >= low_water_mark ({})",
                self.high_water_mark, self.low_water_mark
            )));
        }
        if self.high_water_cutoff < self.high_water_mark {
            return Err(PipeError::InvalidOptions(format!(
                "high_water_cutoff ({}) must be >= high_water_mark ({})",
                self.high_water_cutoff, self.high_water_mark
            )));
        }
        Ok(())
    }
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            flush_chunk_size: Self::DEFAULT_FLUSH_CHUNK_SIZE,
            high_water_mark: Self::DEFAULT_HIGH_WATER_MARK,
            low_water_mark: Self::DEFAULT_LOW_WATER_MARK,
            high_water_cutoff: Self::DEFAULT_HIGH_WATER_CUTOFF,
        }
    }
}

fn check_range(name: &str, value: usize, min: usize, max: usize) -> Result<()> {
    if value < min || value > max {
        return Err(PipeError::InvalidOptions(format!(
            "{name} must be in {min}..={max}, got {value}"
        )));
    }
    Ok(())
}
