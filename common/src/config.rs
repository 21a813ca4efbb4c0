//! Configuration types for runtime and output settings

/// Runtime configuration for tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Quiet level: 1=WARN, 2=ERROR
    pub quiet: u8,
    /// Verbosity level: 0=INFO, 1=DEBUG, 2=TRACE
    pub verbose: u8,
    /// Disable ANSI colors in log output
    pub no_color: bool,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

impl OutputConfig {
    pub fn level(&self) -> tracing::Level {
        if self.verbose > 0 {
            return match self.verbose {
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            };
        }
        match self.quiet {
            0 => tracing::Level::INFO,
            1 => tracing::Level::WARN,
            _ => tracing::Level::ERROR,
        }
    }
}
