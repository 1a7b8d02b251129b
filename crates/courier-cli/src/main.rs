use clap::Parser;
use courier_core::config::{ConfigError, CourierConfig};
use courier_core::{DispatchError, ErrorKind};

mod cli;
mod commands;
mod logging;

// 0: success
// 1: an entry-level failure was reported, or the store failed
// 2: configuration error
const EXIT_FAILURE: i32 = 1;
const EXIT_CONFIG: i32 = 2;

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for_error(&e)
        }
    };
    std::process::exit(exit);
}

async fn real_main() -> anyhow::Result<i32> {
    let args = cli::Args::parse();
    let config = CourierConfig::load(&args.config)?;
    logging::init_tracing(&config.logging).map_err(ConfigError::Invalid)?;
    commands::dispatch(args, config).await
}

fn exit_code_for_error(e: &anyhow::Error) -> i32 {
    if e.downcast_ref::<ConfigError>().is_some()
        || e.downcast_ref::<courier_core::app::BuildError>().is_some()
    {
        return EXIT_CONFIG;
    }
    match e.downcast_ref::<DispatchError>().map(DispatchError::kind) {
        Some(ErrorKind::Configuration) => EXIT_CONFIG,
        _ => EXIT_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::app::BuildError;
    use courier_core::domain::EntryId;

    #[test]
    fn exit_codes_follow_error_class() {
        let cases: Vec<(anyhow::Error, i32)> = vec![
            (ConfigError::Invalid("bad level".into()).into(), EXIT_CONFIG),
            (BuildError::MissingPort("task store").into(), EXIT_CONFIG),
            (
                DispatchError::Configuration("no executor configured".into()).into(),
                EXIT_CONFIG,
            ),
            (
                anyhow::Error::new(DispatchError::Configuration("missing key".into()))
                    .context("run pass"),
                EXIT_CONFIG,
            ),
            (DispatchError::NotFound(format!("entry {}", EntryId::generate())).into(), EXIT_FAILURE),
            (DispatchError::InvalidInput("retention".into()).into(), EXIT_FAILURE),
            (anyhow::anyhow!("failed to open store"), EXIT_FAILURE),
        ];
        for (err, expected) in cases {
            assert_eq!(exit_code_for_error(&err), expected, "{err:#}");
        }
    }
}
