use engine::JobStatusReport;
use model::catalog::status::TableStatus;

pub fn print_status(report: &JobStatusReport) {
    let job = &report.job;
    println!("Job {}", job.id);
    println!("-------------------------------------------");
    println!("{:<22} {}", "Status", job.status);
    println!("{:<22} {}", "Source", job.source.endpoint());
    println!("{:<22} {}", "Target", job.target.endpoint());
    println!("{:<22} {}", "Tables", job.total_tables);
    println!(
        "{:<22} {} total / {} completed / {} failed / {} running",
        "Chunks", job.total_chunks, job.completed_chunks, job.failed_chunks, job.running_chunks
    );
    println!("{:<22} {:.1}%", "Failure rate", job.failure_rate_percent());
    println!(
        "{:<22} {:.0} rows/s",
        "Avg throughput", job.avg_throughput_rows_per_sec
    );
    println!("{:<22} {:.1} MB", "Peak memory", job.peak_memory_mb);
    println!("{:<22} {}", "Created", job.created_at.to_rfc3339());
    if let Some(started) = job.started_at {
        println!("{:<22} {}", "Started", started.to_rfc3339());
    }
    if let Some(completed) = job.completed_at {
        println!("{:<22} {}", "Finished", completed.to_rfc3339());
    }
    if let Some(auto_failed) = job.auto_failed_at {
        println!("{:<22} {}", "Auto-failed", auto_failed.to_rfc3339());
    }
    if let Some(error) = &job.last_error {
        println!("{:<22} {}", "Last error", error);
    }

    if report.tables.is_empty() {
        return;
    }
    println!();
    println!(
        "{:<28} {:<10} {:>8} {:>10} {:>8}",
        "Table", "Status", "Chunks", "Completed", "Failed"
    );
    for table in &report.tables {
        println!(
            "{:<28} {:<10} {:>8} {:>10} {:>8}",
            table.table_name,
            table.status,
            table.total_chunks,
            table.completed_chunks,
            table.failed_chunks
        );
        if table.status == TableStatus::Failed
            && let Some(error) = &table.last_error
        {
            println!("    {error}");
        }
    }
}
