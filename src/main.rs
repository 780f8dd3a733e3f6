use clap::Parser;

use cellcnn_he::{
    config::Args,
    protocol::{train, TrainingReport},
    Result,
};

fn run(args: &Args) -> Result<TrainingReport> {
    let config = args.resolve()?;
    let (train_set, validation) = config.load_data()?;
    log::info!(
        "[main] {} training and {} validation samples, {} features",
        train_set.len(), validation.len(), config.network.features
    );
    let precision = args.precision_check(&config);
    let report = train(&config, &train_set, &validation, precision.is_some())?;
    for party in &report.parties {
        log::debug!("[main] party {}", party.party);
        for (phase, time) in &party.phases {
            log::debug!("{:>20}: {:>10} ms", phase, time.as_millis());
        }
    }
    if let Some(root) = report.parties.first() {
        for (phase, time) in &root.phases {
            log::info!("{:>20}: {:>10} ms per iteration", phase, time.as_millis());
        }
    }
    if let Some(strict) = precision {
        report.check_precision(config.training.precision_bits, strict)?;
    }
    Ok(report)
}

fn main() {
    let args = Args::parse();
    let level = if args.verbose {"debug"} else {"info"};
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&args) {
        Ok(TrainingReport { aborted: Some(e), completed, iterations, .. }) => {
            log::error!("[main] stopped after {} of {} iterations: {}", completed, iterations, e);
            std::process::exit(e.exit_code());
        }
        Ok(report) => {
            println!(
                "trained {} iterations, validation error {:.4}",
                report.completed, report.validation_error
            );
        }
        Err(e) => {
            log::error!("[main] {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
