use anyhow::{Context, Result};
use loragate::logging::{get_logger, init_logging};
use loragate::{Config, Gateway, SerialTransport, VERSION};
use std::time::Duration;

/// Sleep for `cooldown`; `false` when Ctrl-C arrived first
async fn cooldown_or_shutdown(cooldown: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(cooldown) => true,
        _ = tokio::signal::ctrl_c() => false,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    let logger = get_logger("main");
    logger.info(&format!("loragate {} starting up", VERSION));

    let cooldown = Duration::from_millis(config.error_cooldown_ms);
    let mut gateway: Option<Gateway<SerialTransport>> = None;

    // Re-open the serial line whenever it fails, until Ctrl-C
    loop {
        let transport = match SerialTransport::open(&config.serial).await {
            Ok(transport) => transport,
            Err(e) => {
                logger.error(&format!("{}", e));
                if cooldown_or_shutdown(cooldown).await {
                    continue;
                }
                break;
            }
        };

        // Keep battery, alarm and loss state across re-opens
        let mut gw = match gateway.take() {
            Some(mut gw) => {
                gw.replace_transport(transport);
                gw
            }
            None => Gateway::new(config.clone(), transport),
        };
        let result = gw.run().await;
        gateway = Some(gw);

        match result {
            Ok(()) => break,
            Err(e) => {
                logger.error(&format!("Gateway stopped: {}, re-opening serial line", e));
                if !cooldown_or_shutdown(cooldown).await {
                    break;
                }
            }
        }
    }

    logger.info("Shutdown complete");
    Ok(())
}
