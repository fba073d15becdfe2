//! Command execution for the CLI.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use jobfleet_core::{ExecutionMode, JobStatus};
use jobfleet_infra::{JobQueue, QueueConfig};

use crate::args::Command;
use crate::shell::ShellCommand;

/// Run one CLI command against the queue described by `config`.
///
/// Status names are validated before the queue is touched, so an invalid
/// name never leaves a partial mutation behind.
pub async fn execute<W: Write>(command: Command, config: QueueConfig, out: &mut W) -> anyhow::Result<()> {
    match command {
        Command::Clear => {
            attach(config).await?.clear().await?;
        }
        Command::Load { jobs } => {
            attach(config).await?.load(&jobs).await?;
        }
        Command::Loadall { source } => {
            let jobs = read_job_list(&source)?;
            attach(config).await?.load(&jobs).await?;
            info!(loaded = jobs.len(), source = %source, "loaded job list");
        }
        Command::Set { status, jobs } => {
            let status = parse_status(&status)?;
            attach(config).await?.set(&jobs, status).await?;
        }
        Command::Setall { from, to } => {
            let from = parse_status(&from)?;
            let to = parse_status(&to)?;
            attach(config).await?.set_all(from, to).await?;
        }
        Command::Remove { jobs } => {
            attach(config).await?.remove(&jobs).await?;
        }
        Command::List { status, json } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let jobs = attach(config).await?.list(status).await?;
            if json {
                serde_json::to_writer_pretty(&mut *out, &jobs)?;
                writeln!(out)?;
            } else {
                for (index, job) in jobs.iter().enumerate() {
                    writeln!(out, "{index}\t{}\t{}", job.name, job.status)?;
                }
            }
        }
        Command::Errors { json } => {
            let errors = attach(config).await?.errors().await?;
            if json {
                serde_json::to_writer_pretty(&mut *out, &errors)?;
                writeln!(out)?;
            } else {
                for record in &errors {
                    writeln!(
                        out,
                        "{}\t{}\t{}\t{}",
                        record.error_at.format("%Y-%m-%d %H:%M:%S"),
                        record.job_id,
                        record.job_name.as_deref().unwrap_or("-"),
                        record.message
                    )?;
                }
            }
        }
        Command::Stats => {
            let counts = attach(config).await?.counts().await?;
            for status in JobStatus::ALL {
                writeln!(out, "{status}\t{}", counts.get(status))?;
            }
            writeln!(out, "total\t{}", counts.total())?;
        }
        Command::Run { workers, command } => {
            let queue = JobQueue::open(config)
                .await
                .context("failed to open queue for run")?;
            let handler = Arc::new(ShellCommand::from_words(&command));
            let report = queue
                .fleet(workers, ExecutionMode::Resilient, handler)
                .await?;
            writeln!(out, "{} done, {} failed", report.succeeded(), report.failed())?;
        }
    }
    Ok(())
}

async fn attach(config: QueueConfig) -> anyhow::Result<JobQueue> {
    let path = config.path.clone();
    JobQueue::attach(config)
        .await
        .with_context(|| format!("failed to open queue at {}", path.display()))
}

fn parse_status(token: &str) -> anyhow::Result<JobStatus> {
    Ok(token.parse::<JobStatus>()?)
}

/// Read newline-delimited job names from a file, or from stdin for `-`.
fn read_job_list(source: &str) -> anyhow::Result<Vec<String>> {
    if source == "-" {
        return parse_job_list(std::io::stdin().lock());
    }
    let file = std::fs::File::open(Path::new(source))
        .with_context(|| format!("failed to open job list {source}"))?;
    parse_job_list(file)
}

fn parse_job_list<R: Read>(reader: R) -> anyhow::Result<Vec<String>> {
    let mut jobs = Vec::new();
    for line in BufReader::new(reader).lines() {
        let line = line.context("failed to read job list")?;
        let name = line.strip_suffix('\r').unwrap_or(&line);
        if !name.is_empty() {
            jobs.push(name.to_string());
        }
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config(dir: &tempfile::TempDir) -> QueueConfig {
        QueueConfig::new(dir.path().join("cli.db")).with_busy_delay(Duration::from_millis(2))
    }

    async fn run(dir: &tempfile::TempDir, command: Command) -> anyhow::Result<String> {
        let mut out = Vec::new();
        execute(command, config(dir), &mut out).await?;
        Ok(String::from_utf8(out)?)
    }

    fn load(jobs: &[&str]) -> Command {
        Command::Load {
            jobs: jobs.iter().map(|j| j.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn load_then_list_prints_index_name_status() {
        let dir = tempfile::tempdir().unwrap();
        run(&dir, load(&["a", "b"])).await.unwrap();

        let out = run(&dir, Command::List { status: None, json: false }).await.unwrap();

        let mut lines: Vec<&str> = out.lines().map(|l| l.split_once('\t').unwrap().1).collect();
        lines.sort();
        assert_eq!(lines, vec!["a\tready", "b\tready"]);
    }

    #[tokio::test]
    async fn unknown_status_is_rejected_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        run(&dir, load(&["a"])).await.unwrap();

        let err = run(
            &dir,
            Command::Set {
                status: "finished".into(),
                jobs: vec!["a".into()],
            },
        )
        .await
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("finished"), "{msg}");
        assert!(msg.contains("ready, current, done, removed, error, paused"), "{msg}");

        let err = run(
            &dir,
            Command::Setall {
                from: "ready".into(),
                to: "bogus".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("bogus"));

        let out = run(
            &dir,
            Command::List {
                status: Some("ready".into()),
                json: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(out.lines().count(), 1);
    }

    #[tokio::test]
    async fn list_json_is_machine_readable() {
        let dir = tempfile::tempdir().unwrap();
        run(&dir, load(&["x"])).await.unwrap();
        run(
            &dir,
            Command::Set {
                status: "paused".into(),
                jobs: vec!["x".into()],
            },
        )
        .await
        .unwrap();

        let out = run(
            &dir,
            Command::List {
                status: Some("paused".into()),
                json: true,
            },
        )
        .await
        .unwrap();

        let jobs: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(jobs[0]["name"], "x");
        assert_eq!(jobs[0]["status"], "paused");
    }

    #[tokio::test]
    async fn stats_counts_each_status() {
        let dir = tempfile::tempdir().unwrap();
        run(&dir, load(&["a", "b", "c"])).await.unwrap();
        run(&dir, Command::Remove { jobs: vec!["c".into()] }).await.unwrap();

        let out = run(&dir, Command::Stats).await.unwrap();

        assert!(out.contains("ready\t2"), "{out}");
        assert!(out.contains("removed\t1"), "{out}");
        assert!(out.contains("total\t3"), "{out}");
    }

    #[tokio::test]
    async fn run_executes_command_per_job_and_logs_failures() {
        let dir = tempfile::tempdir().unwrap();
        let marker_dir = dir.path().join("marks");
        std::fs::create_dir(&marker_dir).unwrap();
        run(&dir, load(&["one", "two", "bad"])).await.unwrap();

        let template = format!(
            "test {{}} != bad && touch {}/{{}}",
            marker_dir.display()
        );
        let out = run(
            &dir,
            Command::Run {
                workers: 2,
                command: vec![template],
            },
        )
        .await
        .unwrap();
        assert_eq!(out.trim(), "2 done, 1 failed");

        assert!(marker_dir.join("one").exists());
        assert!(marker_dir.join("two").exists());
        assert!(!marker_dir.join("bad").exists());

        let out = run(&dir, Command::Errors { json: false }).await.unwrap();
        let line = out.lines().next().expect("one error line");
        assert!(line.contains("\tbad\t"), "{line}");

        let out = run(
            &dir,
            Command::List {
                status: Some("error".into()),
                json: false,
            },
        )
        .await
        .unwrap();
        assert!(out.contains("bad\terror"));
    }

    #[tokio::test]
    async fn run_with_zero_workers_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(
            &dir,
            Command::Run {
                workers: 0,
                command: vec!["true".into()],
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("at least one worker"));
    }

    #[test]
    fn job_list_skips_blank_lines_and_crlf() {
        let input = "alpha\r\n\nbeta\ngamma";
        let jobs = parse_job_list(input.as_bytes()).unwrap();
        assert_eq!(jobs, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn loadall_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("jobs.txt");
        std::fs::write(&list, "a\nb\nc\n").unwrap();

        run(
            &dir,
            Command::Loadall {
                source: list.display().to_string(),
            },
        )
        .await
        .unwrap();

        let out = run(&dir, Command::Stats).await.unwrap();
        assert!(out.contains("ready\t3"), "{out}");
    }
}
