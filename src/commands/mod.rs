//! CLI commands: run one engine call and print its result.
//!
//! Each command returns the process exit status for a completed call;
//! failures come back as [`SpmError`] for `main` to report.

use log::debug;

use crate::{
    config::Config,
    engine::{InstallOptions, PackageLifecycleEngine},
    error::SpmError,
    runtime::Runtime,
    source::Fetcher,
};

#[tracing::instrument(skip(runtime, fetcher, config))]
pub async fn install<R: Runtime, F: Fetcher>(
    runtime: &R,
    fetcher: &F,
    config: &Config,
    reference: &str,
    develop: bool,
) -> Result<u8, SpmError> {
    let engine = PackageLifecycleEngine::new(runtime, fetcher, config);
    let outcome = engine
        .install(reference, &InstallOptions { develop })
        .await?;

    if outcome.exit_code() == 0 {
        println!("{}", outcome);
    } else {
        eprintln!("{}", outcome);
    }
    Ok(outcome.exit_code())
}

#[tracing::instrument(skip(runtime, fetcher, config))]
pub async fn remove<R: Runtime, F: Fetcher>(
    runtime: &R,
    fetcher: &F,
    config: &Config,
    name: &str,
) -> Result<u8, SpmError> {
    let engine = PackageLifecycleEngine::new(runtime, fetcher, config);
    let outcome = engine.remove(name).await?;
    println!("{}", outcome);
    Ok(outcome.exit_code())
}

/// List installed packages, one name per line
#[tracing::instrument(skip(runtime, fetcher, config))]
pub fn list<R: Runtime, F: Fetcher>(
    runtime: &R,
    fetcher: &F,
    config: &Config,
) -> Result<u8, SpmError> {
    let engine = PackageLifecycleEngine::new(runtime, fetcher, config);
    let names = engine.list()?;
    debug!("Found {} package(s)", names.len());

    for name in names {
        println!("{}", name);
    }
    Ok(0)
}
