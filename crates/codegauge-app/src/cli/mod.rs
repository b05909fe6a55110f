use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand, ValueEnum};

use crate::services::jobs::PipelineJobStatus;

/// Top-level CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "codegauge",
    version,
    author,
    about = "Repository testability auditor"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            command: None,
            verbose: 0,
        }
    }
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn print_help() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
    }
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Analyze a repository archive end to end and print the report.
    Run(RunArgs),
    /// Inspect persisted pipeline jobs.
    Jobs(JobsArgs),
    /// Print the persisted report for a finished job.
    Report(ReportArgs),
}

/// Submit one repository archive for analysis.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Archive to analyze: an `http(s)://` URL or a local `.tar.gz` path.
    #[arg(value_name = "ARCHIVE")]
    pub reference: String,
    /// Owner the extracted units are stored under.
    #[arg(long, default_value = "local")]
    pub user: String,
    /// Project identifier the extracted units are stored under.
    #[arg(long)]
    pub project: String,
    /// Stop after unpacking instead of continuing into analysis.
    #[arg(long = "no-auto-continue", action = ArgAction::SetFalse)]
    pub auto_continue: bool,
}

#[derive(Debug, Args)]
pub struct JobsArgs {
    #[command(subcommand)]
    pub command: JobsCommands,
}

#[derive(Debug, Subcommand)]
pub enum JobsCommands {
    /// List jobs, newest first.
    List(JobsListArgs),
    /// Show one job record.
    Show(JobsShowArgs),
}

#[derive(Debug, Args)]
pub struct JobsListArgs {
    /// Only list jobs in this state.
    #[arg(long, value_enum)]
    pub status: Option<JobStatusFilter>,
    /// Maximum number of jobs to print.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct JobsShowArgs {
    #[arg(value_name = "JOB_ID")]
    pub job_id: String,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[arg(value_name = "JOB_ID")]
    pub job_id: String,
    /// Also print the per-file detail rows.
    #[arg(long)]
    pub details: bool,
}

/// CLI-facing job state filter.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum JobStatusFilter {
    Unpacking,
    Analyzing,
    Reducing,
    Done,
    Stopped,
    Failed,
}

impl From<JobStatusFilter> for PipelineJobStatus {
    fn from(filter: JobStatusFilter) -> Self {
        match filter {
            JobStatusFilter::Unpacking => PipelineJobStatus::Unpacking,
            JobStatusFilter::Analyzing => PipelineJobStatus::Analyzing,
            JobStatusFilter::Reducing => PipelineJobStatus::Reducing,
            JobStatusFilter::Done => PipelineJobStatus::Done,
            JobStatusFilter::Stopped => PipelineJobStatus::Stopped,
            JobStatusFilter::Failed => PipelineJobStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn run_defaults_to_auto_continue() {
        let cli = Cli::try_parse_from([
            "codegauge",
            "run",
            "repo.tar.gz",
            "--project",
            "demo",
        ])
        .expect("parses");
        match cli.command {
            Some(Commands::Run(args)) => {
                assert_eq!(args.reference, "repo.tar.gz");
                assert_eq!(args.user, "local");
                assert_eq!(args.project, "demo");
                assert!(args.auto_continue);
            }
            other => panic!("expected run command, got {other:?}"),
        }
    }

    #[test]
    fn no_auto_continue_flag_disables_continuation() {
        let cli = Cli::try_parse_from([
            "codegauge",
            "run",
            "repo.tar.gz",
            "--project",
            "demo",
            "--no-auto-continue",
        ])
        .expect("parses");
        match cli.command {
            Some(Commands::Run(args)) => assert!(!args.auto_continue),
            other => panic!("expected run command, got {other:?}"),
        }
    }

    #[test]
    fn jobs_list_accepts_status_filter() {
        let cli = Cli::try_parse_from(["codegauge", "jobs", "list", "--status", "failed"])
            .expect("parses");
        match cli.command {
            Some(Commands::Jobs(JobsArgs {
                command: JobsCommands::List(args),
            })) => {
                assert!(matches!(args.status, Some(JobStatusFilter::Failed)));
                assert_eq!(args.limit, 20);
            }
            other => panic!("expected jobs list, got {other:?}"),
        }
    }

    #[test]
    fn report_parses_job_id_and_details_flag() {
        let cli = Cli::try_parse_from(["codegauge", "report", "job-123", "--details"])
            .expect("parses");
        match cli.command {
            Some(Commands::Report(args)) => {
                assert_eq!(args.job_id, "job-123");
                assert!(args.details);
            }
            other => panic!("expected report command, got {other:?}"),
        }
    }
}
