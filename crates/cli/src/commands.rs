use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Create a job from a YAML spec and plan its chunks
    Plan {
        /// Path to the job spec file
        spec: String,
    },
    /// Run a worker loop (plus maintenance duties) until SIGINT
    Worker {
        #[arg(long, help = "Stable worker id; generated when omitted")]
        id: Option<String>,
    },
    /// Print a job's counters and state
    Status {
        job_id: String,

        #[arg(long, help = "Print the status as JSON instead of a table")]
        json: bool,
    },
    /// Reset one terminal-failed chunk back to pending
    RetryChunk { chunk_id: String },
    /// Stop handing out new chunks for a job; in-flight chunks finish
    Pause { job_id: String },
    /// Clear a job's pause flag
    Resume { job_id: String },
}
