use anyhow::Context;
use clap::Parser;
use log::info;

use voice_satellite::audio::AudioCapture;
use voice_satellite::config::{AppConfig, Args};
use voice_satellite::orchestrator::Orchestrator;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_filter())).init();

    if args.list_devices {
        let devices = AudioCapture::list_input_devices().context("listing audio input devices")?;
        info!("available audio input devices:");
        for device in devices {
            println!("{device}");
        }
        return Ok(());
    }

    let mut config = AppConfig::load(&args.config).context("loading configuration")?;
    config.apply_args(&args);

    info!(
        "starting {} on {}/{}",
        config.app.name,
        std::env::consts::ARCH,
        std::env::consts::OS
    );

    Orchestrator::new(config).run().context("running satellite orchestrator")?;

    info!("shutdown complete");
    Ok(())
}
