use clap::{value_parser, Arg, Command, ValueHint};
use pepcal_cli::input::Input;
use pepcal_cli::runner::Runner;
use rayon::ThreadPoolBuilder;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("PEPCAL_LOG", "error,pepcal=info"))
        .init();

    let matches = Command::new("pepcal")
        .version(clap::crate_version!())
        .about("Semi-supervised rescoring and target-decoy FDR estimation for peptide identifications")
        .arg(
            Arg::new("parameters")
                .required(true)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("pin_path")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to a tab-delimited PIN file. Overrides the file \
                     specified in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("output_directory")
                .short('o')
                .long("output_directory")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path where results will be written. \
                     Overrides the directory specified in the configuration file.",
                )
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(u64))
                .help("Seed for the assignment of examples to cross-validation folds")
                .value_hint(ValueHint::Other),
        )
        .arg(
            Arg::new("cpos")
                .long("cpos")
                .value_parser(value_parser!(f64))
                .help("Fixed penalty for misclassified positives. Disables the grid search")
                .value_hint(ValueHint::Other),
        )
        .arg(
            Arg::new("cneg")
                .long("cneg")
                .value_parser(value_parser!(f64))
                .help("Fixed penalty for misclassified negatives. Requires --cpos")
                .value_hint(ValueHint::Other),
        )
        .arg(
            Arg::new("tdc")
                .long("tdc")
                .action(clap::ArgAction::SetTrue)
                .help("Keep only the best scoring target or decoy match per spectrum"),
        )
        .arg(
            Arg::new("psm-only")
                .long("psm-only")
                .action(clap::ArgAction::SetTrue)
                .help("Report PSM-level results only, skipping peptide-level calibration"),
        )
        .arg(
            Arg::new("report-each-iteration")
                .long("report-each-iteration")
                .action(clap::ArgAction::SetTrue)
                .help("Record performance of every training iteration in results.json"),
        )
        .arg(
            Arg::new("quick-validation")
                .long("quick-validation")
                .action(clap::ArgAction::SetTrue)
                .help("Select Cpos/Cneg on the first iteration only, then reuse them"),
        )
        .arg(
            Arg::new("override")
                .long("override")
                .action(clap::ArgAction::SetTrue)
                .help(
                    "Keep the trained model even if it ranks fewer targets \
                     than the initial direction",
                ),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_parser(value_parser!(u16).range(1..))
                .help("Number of worker threads (default = # of CPUs)")
                .value_hint(ValueHint::Other),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    let threads = matches
        .get_one::<u16>("threads")
        .map(|&n| n as usize)
        .unwrap_or_else(num_cpus::get);
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()?;

    let input = Input::from_arguments(matches)?;
    let settings = input.build()?;
    Runner::new(settings).run()?;

    Ok(())
}
