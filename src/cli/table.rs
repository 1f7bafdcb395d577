//! Terminal rendering of the job table and task outcomes.

use chrono::{DateTime, Local, Utc};
use colored::*;

use ducky::scheduler::{JobDescription, TaskOutcome};

fn format_next_run(next: Option<DateTime<Utc>>) -> String {
    match next {
        Some(at) => at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        None => "never".to_string(),
    }
}

/// Lines of the job table, one header plus one line per job.
pub fn job_table(jobs: &[JobDescription]) -> Vec<String> {
    let name_width = jobs.iter().map(|j| j.name.len()).max().unwrap_or(4).max(4);
    let schedule_width = jobs.iter().map(|j| j.schedule.len()).max().unwrap_or(8).max(8);

    let mut lines = vec![format!(
        "{:>3}  {:<name_width$}  {:<schedule_width$}  {}",
        "#",
        "NAME",
        "SCHEDULE",
        "NEXT RUN",
        name_width = name_width,
        schedule_width = schedule_width
    )
    .bold()
    .to_string()];

    for job in jobs {
        lines.push(format!(
            "{:>3}  {:<name_width$}  {:<schedule_width$}  {}",
            job.index,
            job.name.cyan(),
            job.schedule,
            format_next_run(job.next_run).dimmed(),
            name_width = name_width,
            schedule_width = schedule_width
        ));
        if !job.description.is_empty() {
            lines.push(format!("     {} ({})", job.description.dimmed(), job.cron_expression));
        }
    }
    lines
}

pub fn print_job_table(jobs: &[JobDescription]) {
    if jobs.is_empty() {
        println!("{}", "No jobs configured".yellow());
        return;
    }
    for line in job_table(jobs) {
        println!("{}", line);
    }
}

pub fn outcome_line(name: &str, outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Completed => format!("{} {}", "Completed:".green(), name),
        TaskOutcome::Skipped => format!("{} {} (already running)", "Skipped:".yellow(), name),
        TaskOutcome::Failed(reason) => format!("{} {}: {}", "Failed:".red(), name, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn description(index: usize, name: &str) -> JobDescription {
        JobDescription {
            index,
            name: name.to_string(),
            cron_expression: "*/30 * * * *".to_string(),
            schedule: "every 30 minutes".to_string(),
            description: "Reply to mentions".to_string(),
            next_run: None,
        }
    }

    #[test]
    fn test_job_table_rows() {
        let lines = job_table(&[description(1, "reply-bot"), description(2, "digest")]);
        // header + two lines per job
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("SCHEDULE"));
        assert!(lines[1].contains("reply-bot"));
        assert!(lines[1].contains("every 30 minutes"));
        assert!(lines[1].contains("never"));
        assert!(lines[2].contains("*/30 * * * *"));
        assert!(lines[3].contains("digest"));
    }

    #[test]
    fn test_outcome_line() {
        assert!(outcome_line("a", &TaskOutcome::Completed).contains("Completed"));
        assert!(outcome_line("a", &TaskOutcome::Skipped).contains("already running"));
        assert!(outcome_line("a", &TaskOutcome::Failed("boom".to_string())).contains("boom"));
    }
}
