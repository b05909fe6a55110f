use std::process;
use std::sync::Arc;

use tracing_subscriber::{filter::LevelFilter, fmt};

use codegauge_app::cli::{
    Cli, Commands, JobsArgs, JobsCommands, JobsListArgs, JobsShowArgs, ReportArgs, RunArgs,
};
use codegauge_app::config;
use codegauge_app::error::AppError;
use codegauge_app::paths::AppPaths;
use codegauge_app::services::{
    build_pipeline_context, run_pipeline, PipelineJob, PipelineJobStore, PipelineOutcome,
    ReportStore, RunRequest, SqliteReportStore,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_level = determine_log_level(&cli);
    init_tracing(log_level);

    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt().with_max_level(level).with_target(false).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    match cli.command {
        Some(Commands::Run(_)) => match cli.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
        _ => match cli.verbose {
            0 => LevelFilter::OFF,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Some(Commands::Run(args)) => run_analysis(args).await,
        Some(Commands::Jobs(JobsArgs { command })) => match command {
            JobsCommands::List(args) => run_jobs_list(args),
            JobsCommands::Show(args) => run_jobs_show(args),
        },
        Some(Commands::Report(args)) => run_report(args),
        None => {
            Cli::print_help();
            Ok(())
        }
    }
}

async fn run_analysis(args: RunArgs) -> Result<(), AppError> {
    let cfg = config::load()?;
    let ctx = build_pipeline_context(&cfg)?;

    let request = RunRequest {
        reference: args.reference,
        user_id: args.user,
        project_id: args.project,
        auto_continue: args.auto_continue,
    };

    match run_pipeline(&ctx, request).await? {
        PipelineOutcome::Completed(report) => {
            println!("job:             {}", report.job_id);
            println!("files analyzed:  {}", report.total_files);
            println!("files with tests:{:>4}", report.files_with_tests);
            println!("average score:   {:.1}/10", report.avg_score);
            println!("overall score:   {}/100", report.overall_score);
            println!();
            println!("{}", report.summary);
        }
        PipelineOutcome::Stopped { job_id, unit_count } => {
            println!("job {job_id} stopped after unpacking {unit_count} units");
            println!("re-run without --no-auto-continue to analyze them");
        }
    }
    Ok(())
}

fn open_paths() -> Result<AppPaths, AppError> {
    let cfg = config::load()?;
    let paths = match &cfg.storage.data_dir {
        Some(dir) => AppPaths::new(dir)?,
        None => AppPaths::from_project_dirs()?,
    };
    Ok(paths)
}

fn run_jobs_list(args: JobsListArgs) -> Result<(), AppError> {
    let paths = open_paths()?;
    let store = PipelineJobStore::open(&paths)?;
    let jobs = store.list(args.status.map(Into::into), args.limit.max(1))?;

    if jobs.is_empty() {
        println!("no jobs recorded");
        return Ok(());
    }
    for job in jobs {
        print_job_line(&job);
    }
    Ok(())
}

fn run_jobs_show(args: JobsShowArgs) -> Result<(), AppError> {
    let paths = open_paths()?;
    let store = PipelineJobStore::open(&paths)?;
    let job = store
        .get(&args.job_id)?
        .ok_or_else(|| AppError::message(format!("job `{}` not found", args.job_id)))?;

    println!("job:        {}", job.job_id);
    println!("user:       {}", job.user_id);
    println!("project:    {}", job.project_id);
    println!("status:     {}", job.status.as_str());
    println!("units:      {}", job.unit_count);
    println!("created:    {}", format_timestamp_ms(job.created_at_ms));
    println!("updated:    {}", format_timestamp_ms(job.updated_at_ms));
    if let Some(error) = &job.error {
        println!("error:      {error}");
    }
    Ok(())
}

fn run_report(args: ReportArgs) -> Result<(), AppError> {
    let paths = open_paths()?;
    let store: Arc<dyn ReportStore> = Arc::new(SqliteReportStore::open(paths.reports_db_path())?);

    let report = store
        .get_report(&args.job_id)?
        .ok_or_else(|| AppError::message(format!("no report for job `{}`", args.job_id)))?;

    println!("job:             {}", report.job_id);
    println!("project:         {}/{}", report.user_id, report.project_id);
    println!("created:         {}", report.created_at);
    println!("files analyzed:  {}", report.total_files);
    println!("files with tests:{:>4}", report.files_with_tests);
    println!("average score:   {:.1}/10", report.avg_score);
    println!("overall score:   {}/100", report.overall_score);
    println!();
    println!("{}", report.summary);

    if args.details {
        let details = store.get_details(&args.job_id)?;
        println!();
        for detail in details {
            println!(
                "{:>5.1}  {}  tests={} ({})",
                detail.score,
                detail.file_path,
                if detail.has_tests { "yes" } else { "no" },
                detail.test_type
            );
            for observation in &detail.observations {
                println!("       - {observation}");
            }
        }
    }
    Ok(())
}

fn print_job_line(job: &PipelineJob) {
    println!(
        "{}  {:<10} {:>5} units  {}/{}",
        job.job_id,
        job.status.as_str(),
        job.unit_count,
        job.user_id,
        job.project_id
    );
}

fn format_timestamp_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}
