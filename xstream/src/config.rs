use std::time::Duration;

use crate::{DEFAULT_HIGH_WATER_MARK, DEFAULT_READ_BUFFER_SIZE};

/// Configuration of a [`Readable`](crate::Readable).
#[derive(Debug, Clone, Copy)]
pub struct ReadableConfig {
    /// Buffered size at which `push` starts asking the producer to stop.
    pub high_water_mark: usize,

    /// Whether the source starts paused. Attaching a pipe resumes it.
    pub start_paused: bool,
}

impl ReadableConfig {
    pub fn new() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            start_paused: false,
        }
    }

    pub fn with_high_water_mark(mut self, size: usize) -> Self {
        self.high_water_mark = size;
        self
    }

    pub fn with_start_paused(mut self, paused: bool) -> Self {
        self.start_paused = paused;
        self
    }
}

impl Default for ReadableConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of a [`Writable`](crate::Writable).
#[derive(Debug, Clone, Copy)]
pub struct WritableConfig {
    /// Buffered size at which `accept` reports saturation.
    pub high_water_mark: usize,

    /// Reject chunks accepted while saturated instead of queueing them.
    pub strict_saturation: bool,
}

impl WritableConfig {
    pub fn new() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            strict_saturation: false,
        }
    }

    pub fn with_high_water_mark(mut self, size: usize) -> Self {
        self.high_water_mark = size;
        self
    }

    pub fn with_strict_saturation(mut self, strict: bool) -> Self {
        self.strict_saturation = strict;
        self
    }
}

impl Default for WritableConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of a [`Pipe`](crate::Pipe).
#[derive(Debug, Clone, Copy)]
pub struct PipeConfig {
    /// Finalize the sink when the source ends.
    pub end_sink: bool,

    /// Destroy the sink when the source errors.
    pub propagate_source_errors: bool,

    /// Destroy the source when the sink errors. Otherwise it is only paused
    /// and may be piped elsewhere.
    pub destroy_source_on_sink_error: bool,

    /// How long a saturated sink may go without draining before
    /// [`Pipe::check_stall`](crate::Pipe::check_stall) reports a stall.
    /// `None` waits forever.
    pub drain_timeout: Option<Duration>,

    /// Tear the pipe down on a detected stall instead of only reporting it.
    pub fail_on_stall: bool,
}

impl PipeConfig {
    pub fn new() -> Self {
        Self {
            end_sink: true,
            propagate_source_errors: true,
            destroy_source_on_sink_error: false,
            drain_timeout: None,
            fail_on_stall: false,
        }
    }

    pub fn with_end_sink(mut self, end: bool) -> Self {
        self.end_sink = end;
        self
    }

    pub fn with_propagate_source_errors(mut self, propagate: bool) -> Self {
        self.propagate_source_errors = propagate;
        self
    }

    pub fn with_destroy_source_on_sink_error(mut self, destroy: bool) -> Self {
        self.destroy_source_on_sink_error = destroy;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    pub fn with_fail_on_stall(mut self, fail: bool) -> Self {
        self.fail_on_stall = fail;
        self
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of the duplex built by [`spawn_duplex`](crate::io::spawn_duplex).
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Largest chunk read from the transport in one go.
    pub read_buffer_size: usize,

    pub readable: ReadableConfig,

    pub writable: WritableConfig,
}

impl TransportConfig {
    pub fn new() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            readable: ReadableConfig::new(),
            writable: WritableConfig::new(),
        }
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn with_readable(mut self, config: ReadableConfig) -> Self {
        self.readable = config;
        self
    }

    pub fn with_writable(mut self, config: WritableConfig) -> Self {
        self.writable = config;
        self
    }

    /// Small buffers on both directions, trading throughput for latency.
    pub fn low_latency() -> Self {
        Self::new()
            .with_read_buffer_size(4 * 1024)
            .with_readable(ReadableConfig::new().with_high_water_mark(4 * 1024))
            .with_writable(WritableConfig::new().with_high_water_mark(4 * 1024))
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}
