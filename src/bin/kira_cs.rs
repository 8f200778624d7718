use std::fs;
use std::process::ExitCode;
use std::thread;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kira_chrom_session::campaign::Peak;
use kira_chrom_session::config::{ConfigLoader, SessionConfig};
use kira_chrom_session::domain::{CompletionNotice, Severity, TableRow, UploadTable};
use kira_chrom_session::engine::PeakPickingEngine;
use kira_chrom_session::error::KiraError;
use kira_chrom_session::output::{JsonOutput, OutputMode};
use kira_chrom_session::session::Session;
use kira_chrom_session::settings::ProcessingSettings;

#[derive(Parser)]
#[command(name = "kira-cs")]
#[command(about = "Chromatography campaign session: ingest DAD files, process, export")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Build a campaign from a blank and sample files and export it")]
    Ingest(IngestArgs),
    #[command(about = "Process an exported campaign in the background and export the result")]
    Process(ProcessArgs),
    #[command(about = "Process a single chromatogram of a campaign without changing it")]
    Preview(PreviewArgs),
    #[command(about = "Print the sample table of an exported campaign")]
    Table(CampaignArgs),
    #[command(about = "Write the default processing settings")]
    Settings(SettingsArgs),
}

#[derive(Args)]
struct IngestArgs {
    #[arg(required = true)]
    samples: Vec<Utf8PathBuf>,

    #[arg(long)]
    blank: Option<Utf8PathBuf>,

    /// JSON list of per-sample annotations, matched by file name.
    #[arg(long)]
    annotations: Option<Utf8PathBuf>,

    #[arg(long)]
    istd: Option<String>,

    #[arg(long, short)]
    out: Utf8PathBuf,
}

#[derive(Args)]
struct ProcessArgs {
    campaign: Utf8PathBuf,

    #[arg(long)]
    settings: Option<Utf8PathBuf>,

    #[arg(long, short)]
    out: Utf8PathBuf,
}

#[derive(Args)]
struct PreviewArgs {
    campaign: Utf8PathBuf,

    #[arg(long)]
    index: usize,

    #[arg(long)]
    settings: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct CampaignArgs {
    campaign: Utf8PathBuf,
}

#[derive(Args)]
struct SettingsArgs {
    #[arg(long, short)]
    out: Option<Utf8PathBuf>,
}

#[derive(Debug, Deserialize)]
struct Annotation {
    sample: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    compound_name: Option<String>,
    #[serde(default)]
    compound_conc: Option<String>,
    #[serde(default)]
    istd_conc: Option<String>,
}

#[derive(Debug, Serialize)]
struct IngestSummary {
    exported: String,
    chromatograms: usize,
    warnings: Vec<String>,
    table: UploadTable,
}

#[derive(Debug, Serialize)]
struct PreviewSummary {
    name: String,
    peaks: Vec<Peak>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::Validation(_)
        | KiraError::Decode(_)
        | KiraError::CorruptFile(_)
        | KiraError::DataFormat { .. }
        | KiraError::SettingsParse(_)
        | KiraError::ChromatogramNotFound(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_) => 2,
        KiraError::Engine(_) | KiraError::Worker(_) | KiraError::Busy => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest(args) => run_ingest(args, &config, output_mode),
        Commands::Process(args) => run_process(args, &config, output_mode),
        Commands::Preview(args) => run_preview(args, &config, output_mode),
        Commands::Table(args) => run_table(args, &config, output_mode),
        Commands::Settings(args) => run_settings(args),
    }
}

fn run_ingest(args: IngestArgs, config: &SessionConfig, mode: OutputMode) -> miette::Result<()> {
    let session = Session::init(config, PeakPickingEngine)?;

    if let Some(blank) = &args.blank {
        let cached = session.upload_blank(file_name(blank), &read_payload(blank)?)?;
        info!(blank = %cached.original_name, "blank selected");
    }

    let files = args
        .samples
        .iter()
        .map(|path| Ok((file_name(path).to_string(), read_payload(path)?)))
        .collect::<miette::Result<Vec<_>>>()?;
    let mut rows = Vec::new();
    session.upload_samples(&files, &mut rows)?;

    if let Some(path) = &args.annotations {
        let content = fs::read_to_string(path.as_std_path()).into_diagnostic()?;
        let annotations: Vec<Annotation> = serde_json::from_str(&content).into_diagnostic()?;
        apply_annotations(&mut rows, annotations)?;
    }

    let table = UploadTable {
        rows,
        istd: args.istd.clone(),
    };
    let confirmed = session.confirm(&table)?;
    let exported = session.export_campaign()?;
    copy_out(&exported.cached_path, &args.out)?;

    let summary = IngestSummary {
        exported: args.out.to_string(),
        chromatograms: confirmed.outcome.campaign.len(),
        warnings: confirmed.outcome.warnings.clone(),
        table: session.upload_table(),
    };
    match mode {
        OutputMode::Json => JsonOutput::print(&summary).into_diagnostic()?,
        OutputMode::Human => {
            println!("{}", confirmed.notice.message);
            print_table(&summary.table);
            println!("campaign written to {}", summary.exported);
        }
    }
    Ok(())
}

fn run_process(args: ProcessArgs, config: &SessionConfig, mode: OutputMode) -> miette::Result<()> {
    let session = Session::init(config, PeakPickingEngine)?;
    session.upload_campaign(file_name(&args.campaign), &read_payload(&args.campaign)?)?;
    let settings = match &args.settings {
        Some(path) => ProcessingSettings::load(path)?,
        None => session.settings(),
    };

    // Detached: completion is observed through polling only.
    drop(session.start_processing(settings)?);
    let notice = loop {
        if let Some(notice) = session.poll_processing() {
            break notice;
        }
        thread::sleep(config.poll_interval);
    };

    report_notice(&notice, mode)?;
    if notice.severity == Severity::Error {
        return Err(KiraError::Engine(notice.message).into());
    }
    let exported = session.export_campaign()?;
    copy_out(&exported.cached_path, &args.out)?;
    if matches!(mode, OutputMode::Human) {
        println!("processed campaign written to {}", args.out);
    }
    Ok(())
}

fn run_preview(args: PreviewArgs, config: &SessionConfig, mode: OutputMode) -> miette::Result<()> {
    let session = Session::init(config, PeakPickingEngine)?;
    session.upload_campaign(file_name(&args.campaign), &read_payload(&args.campaign)?)?;
    let settings = match &args.settings {
        Some(path) => ProcessingSettings::load(path)?,
        None => session.settings(),
    };

    let preview = session.preview(&settings, Some(args.index))?;
    let chromatogram = preview
        .chromatograms
        .into_values()
        .next()
        .ok_or(KiraError::ChromatogramNotFound(args.index))?;
    let summary = PreviewSummary {
        name: chromatogram.name,
        peaks: chromatogram.peaks,
    };
    match mode {
        OutputMode::Json => JsonOutput::print(&summary).into_diagnostic()?,
        OutputMode::Human => {
            println!("Preview of {}: {} peaks", summary.name, summary.peaks.len());
            let time = &chromatogram.raw.time;
            for peak in &summary.peaks {
                println!(
                    "  apex {:>8.3}  height {:>10.5}  area {:>10.5}  {}",
                    time[peak.apex],
                    peak.height,
                    peak.integral,
                    peak.compound.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

fn run_table(args: CampaignArgs, config: &SessionConfig, mode: OutputMode) -> miette::Result<()> {
    let session = Session::init(config, PeakPickingEngine)?;
    let table =
        session.upload_campaign(file_name(&args.campaign), &read_payload(&args.campaign)?)?;
    match mode {
        OutputMode::Json => JsonOutput::print(&table).into_diagnostic()?,
        OutputMode::Human => print_table(&table),
    }
    Ok(())
}

fn run_settings(args: SettingsArgs) -> miette::Result<()> {
    let settings = ProcessingSettings::default();
    match &args.out {
        Some(path) => settings.save(path)?,
        None => println!("{}", settings.to_text()?),
    }
    Ok(())
}

fn apply_annotations(rows: &mut [TableRow], annotations: Vec<Annotation>) -> miette::Result<()> {
    for annotation in annotations {
        let row = rows
            .iter_mut()
            .find(|row| row.sample == annotation.sample)
            .ok_or_else(|| {
                KiraError::Validation(format!(
                    "annotation for unknown sample file `{}`",
                    annotation.sample
                ))
            })?;
        if let Some(name) = annotation.name {
            row.name = name;
        }
        row.compound_name = annotation.compound_name;
        row.compound_conc = annotation.compound_conc;
        row.istd_conc = annotation.istd_conc;
    }
    Ok(())
}

fn read_payload(path: &Utf8Path) -> miette::Result<String> {
    let bytes = fs::read(path.as_std_path()).into_diagnostic()?;
    Ok(format!(
        "data:application/octet-stream;base64,{}",
        STANDARD.encode(bytes)
    ))
}

fn file_name(path: &Utf8Path) -> &str {
    path.file_name().unwrap_or(path.as_str())
}

fn copy_out(from: &Utf8Path, to: &Utf8Path) -> miette::Result<()> {
    fs::copy(from.as_std_path(), to.as_std_path()).into_diagnostic()?;
    Ok(())
}

fn report_notice(notice: &CompletionNotice, mode: OutputMode) -> miette::Result<()> {
    match mode {
        OutputMode::Json => JsonOutput::print(notice).into_diagnostic(),
        OutputMode::Human => {
            println!("[{}] {}", notice.severity, notice.message);
            Ok(())
        }
    }
}

fn print_table(table: &UploadTable) {
    if let Some(istd) = &table.istd {
        println!("internal standard: {istd}");
    }
    for row in &table.rows {
        println!(
            "{:>3}  {:<16} {:<24} {:<24} {:<12} {:>8} {:>8}",
            row.chromatogram_id
                .map_or_else(|| "-".to_string(), |idx| idx.to_string()),
            row.name,
            row.sample,
            row.blank.as_deref().unwrap_or("-"),
            row.compound_name.as_deref().unwrap_or("-"),
            row.compound_conc.as_deref().unwrap_or("-"),
            row.istd_conc.as_deref().unwrap_or("-"),
        );
    }
}
