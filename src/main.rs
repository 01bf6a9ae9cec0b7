//! CLI entry point for the REM pipeline.
//!
//! Provides subcommands for extracting Verifit, eSTAT, MedRx and in-situ
//! exports, comparing measured output against targets, and scoring behavioural data.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rem_pipeline::analyzers::analyzer::{
    InputSpec, run_compare, run_estat, run_insitu, run_medrx, run_outliers, run_sdt, run_verifit,
};
use rem_pipeline::config::{StudyConfig, TestType};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "rem_pipeline")]
#[command(about = "Real-ear measurement extraction and target-match analysis", long_about = None)]
struct Cli {
    /// Study configuration (TOML); built-in defaults when omitted
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract Verifit sessions and report measured minus Verifit target
    Verifit {
        /// Directory containing session files
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(long, default_value = "*.xml")]
        pattern: String,

        /// Descend into subdirectories
        #[arg(short, long, default_value_t = false)]
        recursive: bool,

        /// Overrides the configured test type
        #[arg(long, value_enum)]
        test_type: Option<TestType>,

        /// Overrides the configured number of curves per ear
        #[arg(long)]
        curves: Option<u8>,

        #[arg(short, long, default_value = "verifit_report")]
        out_dir: PathBuf,
    },
    /// Extract eSTAT targets into a long CSV
    Estat {
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(long, default_value = "*.csv")]
        pattern: String,

        #[arg(short, long, default_value = "estat_targets.csv")]
        out: PathBuf,
    },
    /// Compare Verifit measurements with eSTAT targets
    Compare {
        #[arg(long)]
        verifit_dir: PathBuf,

        #[arg(long)]
        estat_dir: PathBuf,

        /// PID,Form_Factor key used instead of the eSTAT device descriptions
        #[arg(long, value_name = "FILE")]
        form_key: Option<PathBuf>,

        /// Report by collapsed form-factor group instead of form factor
        #[arg(long, default_value_t = false)]
        collapse: bool,

        #[arg(short, long, default_value = "compare_report")]
        out_dir: PathBuf,
    },
    /// Report MedRx measured minus MedRx target
    Medrx {
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long, default_value = "medrx_report")]
        out_dir: PathBuf,
    },
    /// Report booth minus in-situ thresholds per hearing-aid condition
    Insitu {
        /// Directory of subject_style_venting_environment.csv runs
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(long, default_value = "*.csv")]
        pattern: String,

        #[arg(short, long, default_value = "insitu_report")]
        out_dir: PathBuf,
    },
    /// Compute d-prime, beta and percent correct from response files
    Sdt {
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long, default_value = "sdt.csv")]
        out: PathBuf,
    },
    /// Screen subject,condition,value scores for boxplot outliers
    Outliers {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "outliers.csv")]
        out: PathBuf,

        /// Also write the scores with outliers removed to this file
        #[arg(long, value_name = "FILE")]
        clean: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/rem_pipeline.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("rem_pipeline.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let mut config = StudyConfig::load(cli.config.as_deref())?;
    debug!(?config, "Study configuration");

    match cli.command {
        Commands::Verifit {
            dir,
            pattern,
            recursive,
            test_type,
            curves,
            out_dir,
        } => {
            if let Some(test_type) = test_type {
                config.test_type = test_type;
            }
            if let Some(curves) = curves {
                config.num_curves = curves;
            }
            config.validate()?;
            let input = InputSpec {
                dir,
                pattern,
                recursive,
            };
            run_verifit(&config, &input, &out_dir)?;
        }
        Commands::Estat { dir, pattern, out } => {
            let input = InputSpec {
                dir,
                pattern,
                recursive: false,
            };
            run_estat(&config, &input, &out)?;
        }
        Commands::Compare {
            verifit_dir,
            estat_dir,
            form_key,
            collapse,
            out_dir,
        } => {
            run_compare(
                &config,
                &InputSpec::new(verifit_dir, "*.xml"),
                &InputSpec::new(estat_dir, "*.csv"),
                form_key.as_deref(),
                collapse,
                &out_dir,
            )?;
        }
        Commands::Medrx { dir, out_dir } => {
            run_medrx(&config, &InputSpec::new(dir, "*.csv"), &out_dir)?;
        }
        Commands::Insitu {
            dir,
            pattern,
            out_dir,
        } => {
            let input = InputSpec {
                dir,
                pattern,
                recursive: false,
            };
            run_insitu(&config, &input, &out_dir)?;
        }
        Commands::Sdt { dir, out } => {
            run_sdt(&InputSpec::new(dir, "*.csv"), &out)?;
        }
        Commands::Outliers { input, out, clean } => {
            run_outliers(&input, &out, clean.as_deref())?;
        }
    }

    info!("Done");
    Ok(())
}
