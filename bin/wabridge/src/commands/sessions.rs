use chrono::Local;
use std::sync::Arc;
use wabridge_browser::{ChromeDriver, ProcessControl, SystemProcesses};
use wabridge_core::{Config, Paths};
use wabridge_storage::SessionStore;
use wabridge_whatsapp::WhatsAppService;

/// Print every persisted session with the state of its browser process.
pub async fn list() -> anyhow::Result<()> {
    let paths = Paths::new();
    let records = SessionStore::new(&paths).load()?;
    let processes = SystemProcesses;

    println!();
    println!("Sessions ({})", records.len());
    println!("  File: {}", paths.token_data_file().display());
    println!();
    if records.is_empty() {
        println!("  (none)");
        return Ok(());
    }

    for (token, record) in &records {
        let state = if processes.is_alive(record.pid) {
            "running"
        } else {
            "dead"
        };
        println!(
            "  {}  pid {:<7} {:<8} children {:?}  created {}",
            token,
            record.pid,
            state,
            record.child_pids,
            record.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Kill the recorded browser of a session started by a gateway process.
pub async fn terminate(token: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let service = WhatsAppService::new(
        config.whatsapp,
        &paths,
        Arc::new(ChromeDriver::new(config.browser, paths.clone())),
        Arc::new(SystemProcesses),
    )?;

    service.terminate(token).await?;
    println!("Session {} terminated", token);
    Ok(())
}
