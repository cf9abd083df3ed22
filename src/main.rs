use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use webot::types::events::{GROUP_MESSAGE_PATH, LOGIN_PATH, SOLO_MESSAGE_PATH};
use webot::{Client, ClientConfig, Event, LoginStatus};

// A demo bot that logs what it sees and answers "ping" with "pong".
//
// Usage:
//   cargo run                                  # caches under ./.webot
//   cargo run -- --storage /tmp/bot            # custom storage root
//   cargo run -- --config bot.json --timer 300 # config file plus a 5m timer

#[derive(Parser, Debug)]
#[command(version, about = "Web messaging demo bot")]
struct Args {
    /// Directory for the session caches and the QR image.
    #[arg(short, long)]
    storage: Option<PathBuf>,

    /// JSON file with client settings.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Publish a timer tick every N seconds.
    #[arg(long)]
    timer: Option<u64>,

    /// Publish a daily event at this local time (HH:MM).
    #[arg(long)]
    at: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_json(&std::fs::read(path)?)?,
        None => ClientConfig::default(),
    };
    if let Some(dir) = &args.storage {
        config = config.with_storage_dir(dir.clone());
    }
    Ok(config)
}

fn log_event(event: &Event) -> anyhow::Result<()> {
    info!(target: "Demo", "{} from {}: {:?}", event.path, event.source, event.payload);
    Ok(())
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return;
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            return;
        }
    };

    rt.block_on(async {
        let client = match Client::builder(config)
            .on(LOGIN_PATH, |event: &Event| {
                match event.as_login() {
                    Some(LoginStatus::Success) => info!(target: "Demo", "Logged in"),
                    Some(LoginStatus::Failure { reason }) => warn!(target: "Demo", "Login failed: {reason}"),
                    None => {}
                }
                Ok(())
            })
            .on(GROUP_MESSAGE_PATH, log_event)
            .build()
            .await
        {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!("Failed to create client: {e}");
                return;
            }
        };

        let replier = Arc::downgrade(&client);
        client.subscribe(SOLO_MESSAGE_PATH, move |event: &Event| {
            log_event(event)?;
            let Some(message) = event.as_message() else {
                return Ok(());
            };
            if message.content.trim() != "ping" {
                return Ok(());
            }
            let Some(client) = replier.upgrade() else {
                return Ok(());
            };
            let to = message.from_id.clone();
            tokio::spawn(async move {
                if let Err(e) = client.send_text(&to, "pong").await {
                    warn!(target: "Demo", "Could not reply to {to}: {e}");
                }
            });
            Ok(())
        });

        if let Some(secs) = args.timer {
            let interval = Duration::from_secs(secs.max(1));
            client.add_timer(interval);
            client.subscribe(webot::types::events::timer_path(interval), log_event);
        }
        if let Some(at) = &args.at {
            match client.add_daily_timing(at) {
                Ok(_) => client.subscribe(webot::types::events::timing_path(at.trim()), log_event),
                Err(e) => warn!(target: "Demo", "Ignoring --at: {e}"),
            }
        }

        let mut running = client.run();
        tokio::select! {
            result = &mut running => match result {
                Ok(Ok(())) => info!("Client stopped"),
                Ok(Err(e)) => error!("Client stopped: {e}"),
                Err(e) => error!("Client task failed: {e}"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                client.shutdown();
                let _ = running.await;
            }
        }
    });
}
