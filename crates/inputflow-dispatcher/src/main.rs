//! inputflowd: a self-contained demonstration of the dispatch engine.
//!
//! The daemon opens loopback channels for a handful of simulated clients,
//! starts the dispatcher thread, replays synthetic key presses and taps, waits
//! until every client has acknowledged what it received, and prints the
//! dispatcher's state dump.
//!
//! # Usage
//!
//! ```text
//! inputflowd [OPTIONS]
//!
//! Options:
//!   --config <PATH>       Config file [default: $XDG_CONFIG_HOME/inputflow/config.toml]
//!   --clients <N>         Number of simulated clients [default: 2]
//!   --monitor             Also register a monitor channel
//!   --keys <LABELS>       Comma-separated key labels to press [default: A,B,ENTER]
//!   --taps <N>            Number of taps delivered to the first client [default: 1]
//!   --log-level <LEVEL>   Overrides the config file's log level
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  ├─ InputDispatcher + Looper        -- engine and the poller it blocks on
//!  ├─ InputDispatcherThread           -- "InputDispatcher" std::thread
//!  └─ one blocking tokio task per simulated client
//!       └─ InputConsumer: wait → consume → send_finished_signal
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use inputflow_core::domain::codes::{key_action, motion_action, source, tool_type};
use inputflow_core::keymap::{keycode_from_label, keycode_label};
use inputflow_core::protocol::{open_channel_pair, InputConsumer};
use inputflow_core::{
    ChannelId, InputMessage, InputTarget, KeyFlags, MotionFlags, NotifyKeyArgs,
    NotifyMotionArgs, PointerCoords, PointerProperties, PolicyFlags, ReceiveError,
};
use inputflow_dispatcher::application::{
    InputDispatcher, PassThroughPolicy, SystemTimeSource, TimeSource,
};
use inputflow_dispatcher::infrastructure::dispatch_thread::InputDispatcherThread;
use inputflow_dispatcher::infrastructure::looper::Looper;
use inputflow_dispatcher::infrastructure::storage::config::{
    config_file_path, load_config, DispatcherConfig,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Input dispatch engine demonstration daemon.
#[derive(Debug, Parser)]
#[command(
    name = "inputflowd",
    about = "Replays synthetic input through the dispatch engine to simulated clients",
    version
)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(long, env = "INPUTFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Number of simulated client connections.
    #[arg(long, default_value_t = 2)]
    clients: usize,

    /// Register an additional monitor channel that sees every event.
    #[arg(long)]
    monitor: bool,

    /// Comma-separated key labels, each pressed and released on the focused
    /// client.
    #[arg(long, value_delimiter = ',', default_value = "A,B,ENTER")]
    keys: Vec<String>,

    /// Number of single-finger taps delivered to the first client.
    #[arg(long, default_value_t = 1)]
    taps: usize,

    /// `tracing` level; overrides the config file.
    #[arg(long, env = "INPUTFLOW_LOG")]
    log_level: Option<String>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<DispatcherConfig> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => match config_file_path() {
                Ok(path) => path,
                Err(e) => {
                    eprintln!("{e}; using built-in defaults");
                    return Ok(DispatcherConfig::default());
                }
            },
        };
        load_config(&path).with_context(|| format!("failed to load config {}", path.display()))
    }

    fn key_codes(&self) -> anyhow::Result<Vec<i32>> {
        self.keys
            .iter()
            .map(|label| label.trim())
            .filter(|label| !label.is_empty())
            .map(|label| {
                keycode_from_label(label).with_context(|| format!("unknown key label '{label}'"))
            })
            .collect()
    }
}

// ── Simulated clients ─────────────────────────────────────────────────────────

/// Acknowledges everything published to `consumer` until the dispatcher side
/// closes or `running` is cleared.  Returns how many events were handled.
fn run_client(mut consumer: InputConsumer, running: Arc<AtomicBool>) -> usize {
    let mut handled = 0;
    while running.load(Ordering::Relaxed) {
        if !consumer.wait(Duration::from_millis(50)) {
            continue;
        }
        match consumer.consume() {
            Ok(message) => {
                describe(consumer.name(), &message);
                if let Err(e) = consumer.send_finished_signal(message.seq(), true) {
                    warn!("client '{}' failed to acknowledge: {e}", consumer.name());
                    break;
                }
                handled += 1;
            }
            Err(ReceiveError::WouldBlock) => {}
            Err(e) => {
                info!("client '{}' stopping: {e}", consumer.name());
                break;
            }
        }
    }
    handled
}

fn describe(client: &str, message: &InputMessage) {
    match message {
        InputMessage::Key { seq, event } => info!(
            "client '{client}' <- key seq={seq} {} {}",
            keycode_label(event.key_code).unwrap_or("?"),
            key_action::label(event.action)
        ),
        InputMessage::Motion { seq, event } => info!(
            "client '{client}' <- motion seq={seq} {} at ({:.1}, {:.1})",
            motion_action::label(event.action),
            event.x(0).unwrap_or_default(),
            event.y(0).unwrap_or_default()
        ),
        InputMessage::Finished { .. } => {}
    }
}

// ── Synthetic input ───────────────────────────────────────────────────────────

fn key_args(action: i32, key_code: i32, event_time: i64, down_time: i64) -> NotifyKeyArgs {
    NotifyKeyArgs {
        event_time,
        device_id: 1,
        source: source::KEYBOARD,
        policy_flags: PolicyFlags::default(),
        action,
        flags: KeyFlags::default(),
        key_code,
        scan_code: 0,
        meta_state: 0,
        down_time,
    }
}

fn tap_args(action: i32, x: f32, y: f32, event_time: i64, down_time: i64) -> NotifyMotionArgs {
    NotifyMotionArgs {
        event_time,
        device_id: 2,
        source: source::TOUCHSCREEN,
        policy_flags: PolicyFlags::default(),
        action,
        flags: MotionFlags::default(),
        meta_state: 0,
        button_state: 0,
        edge_flags: 0,
        pointer_properties: vec![PointerProperties {
            id: 0,
            tool_type: tool_type::FINGER,
        }],
        pointer_coords: vec![PointerCoords::at(x, y)],
        x_precision: 1.0,
        y_precision: 1.0,
        down_time,
    }
}

fn replay_input(
    dispatcher: &InputDispatcher,
    clock: &dyn TimeSource,
    focused: ChannelId,
    key_codes: &[i32],
    taps: usize,
) {
    for &key_code in key_codes {
        let down = clock.now();
        dispatcher.notify_key(&key_args(key_action::DOWN, key_code, down, down));
        dispatcher.notify_key(&key_args(key_action::UP, key_code, clock.now(), down));
    }

    let target = InputTarget::foreground(focused).with_offset(-10.0, -20.0);
    for i in 0..taps {
        let x = 100.0 + 25.0 * i as f32;
        let down = clock.now();
        dispatcher.notify_motion(&tap_args(motion_action::DOWN, x, 200.0, down, down), &[target]);
        dispatcher.notify_motion(
            &tap_args(motion_action::UP, x, 200.0, clock.now(), down),
            &[target],
        );
    }
}

/// Waits until every connection has drained its queues.
async fn wait_for_delivery(
    dispatcher: &InputDispatcher,
    ids: &[ChannelId],
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let idle = dispatcher.inbound_queue_len() == 0
            && ids.iter().all(|&id| {
                dispatcher.outbound_queue_len(id).unwrap_or(0) == 0
                    && dispatcher.wait_queue_len(id).unwrap_or(0) == 0
            });
        if idle {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    // Initialise structured logging.  `RUST_LOG` wins over both the CLI and
    // the config file.
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    if cli.clients == 0 {
        bail!("--clients must be at least 1");
    }
    let key_codes = cli.key_codes()?;

    info!("inputflowd starting");

    let clock = Arc::new(SystemTimeSource::new());
    let dispatcher = Arc::new(
        InputDispatcher::new(
            Arc::new(PassThroughPolicy),
            Arc::new(Looper::new()),
            config.to_settings(),
        )
        .with_time_source(Arc::clone(&clock) as Arc<dyn TimeSource>),
    );

    // ── Channels ──────────────────────────────────────────────────────────────
    let mut consumers = Vec::new();
    let mut ids = Vec::new();
    for i in 0..cli.clients {
        let (server, consumer) = open_channel_pair(&format!("client-{i}"), config.channel_capacity_bytes);
        ids.push(dispatcher.register_input_channel(Box::new(server), false)?);
        consumers.push(consumer);
    }
    if cli.monitor {
        let (server, consumer) = open_channel_pair("monitor", config.channel_capacity_bytes);
        ids.push(dispatcher.register_input_channel(Box::new(server), true)?);
        consumers.push(consumer);
    }
    let focused = ids[0];
    dispatcher.set_focused_channel(Some(focused));

    // ── Client tasks ──────────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let clients: Vec<_> = consumers
        .into_iter()
        .map(|consumer| {
            let running = Arc::clone(&running);
            tokio::task::spawn_blocking(move || run_client(consumer, running))
        })
        .collect();

    // ── Dispatch ──────────────────────────────────────────────────────────────
    let thread = InputDispatcherThread::start(Arc::clone(&dispatcher))
        .context("failed to start the dispatcher thread")?;
    dispatcher.set_input_dispatch_mode(true, false);

    replay_input(&dispatcher, clock.as_ref(), focused, &key_codes, cli.taps);

    tokio::select! {
        delivered = wait_for_delivery(&dispatcher, &ids, Duration::from_secs(10)) => {
            if !delivered {
                warn!("timed out waiting for clients to acknowledge all events");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    println!("{}", dispatcher.dump());

    // ── Shutdown ──────────────────────────────────────────────────────────────
    dispatcher.set_input_dispatch_mode(false, false);
    thread.join();
    running.store(false, Ordering::Relaxed);
    for client in clients {
        let handled = client.await.context("client task panicked")?;
        info!("client finished after handling {handled} events");
    }

    info!("inputflowd stopped");
    Ok(())
}
