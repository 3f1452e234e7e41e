// BLE calendar sync CLI: discover nearby peers and exchange the local
// month-calendar with one of them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use log::info;
use tokio::sync::broadcast::error::RecvError;

use ble_calendar_sync::{
    AppState, CoreEvent, EntryStore, JsonFileStore, PeerSnapshot, SyncConfig, TransferOutcome,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("ble-calendar-sync {}", VERSION);
    eprintln!("Usage:");
    eprintln!("  ble-calendar-sync show                           List local calendar entries");
    eprintln!("  ble-calendar-sync add <month> <day> <title> [location]");
    eprintln!("  ble-calendar-sync remove <month>");
    eprintln!("  ble-calendar-sync scan [seconds]                 Live discovery (default 10s)");
    eprintln!("  ble-calendar-sync refresh                        One-shot buffered refresh");
    eprintln!("  ble-calendar-sync send <peer-id>                 Send the calendar to a peer");
    eprintln!("  ble-calendar-sync receive <peer-id>              Connect and wait for a calendar");
    eprintln!();
    eprintln!("Data directory: $CALENDAR_SYNC_DIR (default ./.calendar-sync)");
}

fn main() -> Result<()> {
    ble_calendar_sync::logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("ble-calendar-sync {}", VERSION);
        return Ok(());
    }
    if args.is_empty() {
        print_usage();
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args))
}

async fn run(args: Vec<String>) -> Result<()> {
    let data_dir = std::env::var("CALENDAR_SYNC_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".calendar-sync"));
    let config = SyncConfig::load_config(&data_dir).await?;
    let store: Arc<dyn EntryStore> = Arc::new(JsonFileStore::new(&data_dir));

    match args[0].as_str() {
        "show" => show(&store).await,
        "add" => {
            if args.len() < 4 {
                bail!("usage: add <month> <day> <title> [location]");
            }
            let month: u8 = args[1].parse()?;
            let day: u8 = args[2].parse()?;
            let location = args.get(4).map(String::as_str).unwrap_or("");
            add(&store, month, day, &args[3], location).await
        }
        "remove" => {
            if args.len() < 2 {
                bail!("usage: remove <month>");
            }
            remove(&store, args[1].parse()?).await
        }
        "scan" => {
            let seconds: u64 = args.get(1).map(|s| s.parse()).transpose()?.unwrap_or(10);
            scan(config, store, seconds).await
        }
        "refresh" => refresh(config, store).await,
        "send" => {
            if args.len() < 2 {
                bail!("usage: send <peer-id>");
            }
            send(config, store, &args[1]).await
        }
        "receive" => {
            if args.len() < 2 {
                bail!("usage: receive <peer-id>");
            }
            receive(config, store, &args[1]).await
        }
        other => {
            print_usage();
            Err(anyhow!("unknown command: {}", other))
        }
    }
}

async fn show(store: &Arc<dyn EntryStore>) -> Result<()> {
    let entries = store.load_entries().await?.unwrap_or_default();
    if entries.is_empty() {
        println!("No calendar entries.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{:>2}/{:<2} {:<15} {}",
            entry.month, entry.day, entry.title, entry.location
        );
    }
    Ok(())
}

async fn add(
    store: &Arc<dyn EntryStore>,
    month: u8,
    day: u8,
    title: &str,
    location: &str,
) -> Result<()> {
    // Editing is a pure store operation, so it works with the radio off.
    let entry = ble_calendar_sync::CalendarEntry::new(title, location, month, day)?;
    let mut entries = store.load_entries().await?.unwrap_or_default();
    ble_calendar_sync::calendar::entry::upsert_entry(&mut entries, entry);
    store.save_entries(&entries).await?;
    info!("Saved {} entries", entries.len());
    show(store).await
}

async fn remove(store: &Arc<dyn EntryStore>, month: u8) -> Result<()> {
    let mut entries = store.load_entries().await?.unwrap_or_default();
    if ble_calendar_sync::calendar::entry::remove_month(&mut entries, month) {
        store.save_entries(&entries).await?;
        println!("Removed entry for month {}.", month);
    } else {
        println!("No entry for month {}.", month);
    }
    Ok(())
}

fn print_peers(peers: &[PeerSnapshot]) {
    if peers.is_empty() {
        println!("No peers found.");
        return;
    }
    println!("{:<3} {:<24} {:>5}  {:<9} {:<8} id", "cat", "name", "rssi", "app", "state");
    for peer in peers {
        println!(
            "{:<3} {:<24} {:>5}  {:<9} {:<8} {}",
            peer.signal_category,
            peer.name,
            peer.rssi,
            if peer.is_peer_app { "calendar" } else { "-" },
            if peer.is_connected { "conn" } else { "-" },
            peer.id,
        );
    }
}

fn spawn_event_printer(app: &AppState) {
    let mut events = app.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                CoreEvent::TransferProgress { progress } => {
                    info!("Transfer progress: {:.0}%", progress * 100.0);
                }
                CoreEvent::TransferFinished { outcome } => match outcome {
                    TransferOutcome::Sent => println!("Calendar sent."),
                    TransferOutcome::Failed { reason } => println!("Transfer failed: {}", reason),
                },
                CoreEvent::CalendarReceived { payload } => {
                    println!(
                        "Calendar received from {} ({} entries).",
                        payload.sender,
                        payload.entries.len()
                    );
                }
                CoreEvent::DiscoveryStatus { message } => println!("{}", message),
                other => info!("{:?}", other),
            }
        }
    });
}

async fn scan(config: SyncConfig, store: Arc<dyn EntryStore>, seconds: u64) -> Result<()> {
    let app = AppState::new(config, store).await?;
    spawn_event_printer(&app);

    let manager = app.get_sync_manager_arc();
    manager.lock().await.start_scan().await?;
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    manager.lock().await.stop_scan().await?;

    print_peers(&manager.lock().await.peers());
    Ok(())
}

async fn refresh(config: SyncConfig, store: Arc<dyn EntryStore>) -> Result<()> {
    let window = config.refresh_window_secs;
    let app = AppState::new(config, store).await?;
    spawn_event_printer(&app);

    let manager = app.get_sync_manager_arc();
    manager.lock().await.refresh().await?;
    tokio::time::sleep(Duration::from_secs(window + 1)).await;

    let guard = manager.lock().await;
    print_peers(&guard.peers());
    if let Some(at) = guard.last_scan_time() {
        println!("Last scan: {}", at.to_rfc3339());
    }
    Ok(())
}

/// Scans until the peer shows up, for at most `seconds`.
async fn discover_peer(app: &AppState, peer_id: &str, seconds: u64) -> Result<()> {
    let manager = app.get_sync_manager_arc();
    manager.lock().await.start_scan().await?;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let found = manager
            .lock()
            .await
            .peers()
            .iter()
            .any(|p| p.id == peer_id);
        if found {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            manager.lock().await.stop_scan().await?;
            bail!("peer {} not found within {}s", peer_id, seconds);
        }
    }
    manager.lock().await.stop_scan().await?;
    Ok(())
}

async fn send(config: SyncConfig, store: Arc<dyn EntryStore>, peer_id: &str) -> Result<()> {
    let app = AppState::new(config, store).await?;
    let mut events = app.subscribe();
    spawn_event_printer(&app);

    discover_peer(&app, peer_id, 15).await?;

    let manager = app.get_sync_manager_arc();
    manager.lock().await.send_calendar(peer_id).await?;

    // The outcome arrives through the event stream.
    let result = tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            match events.recv().await {
                Ok(CoreEvent::TransferFinished { outcome }) => return outcome,
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {
                    return TransferOutcome::Failed {
                        reason: "event stream closed".to_string(),
                    };
                }
            }
        }
    })
    .await
    .map_err(|_| anyhow!("timed out waiting for the transfer outcome"))?;

    match result {
        TransferOutcome::Sent => Ok(()),
        TransferOutcome::Failed { reason } => Err(anyhow!(reason)),
    }
}

async fn receive(config: SyncConfig, store: Arc<dyn EntryStore>, peer_id: &str) -> Result<()> {
    let app = AppState::new(config, store).await?;
    let mut events = app.subscribe();
    spawn_event_printer(&app);

    discover_peer(&app, peer_id, 15).await?;

    let manager = app.get_sync_manager_arc();
    manager.lock().await.connect_peer(peer_id).await?;
    println!("Connected. Waiting for a calendar (ctrl-c to stop)...");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(CoreEvent::CalendarReceived { .. }) => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => bail!("event stream closed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted.");
                break;
            }
        }
    }

    let mut guard = manager.lock().await;
    if guard.is_connected().await {
        guard.disconnect().await?;
    }
    Ok(())
}
