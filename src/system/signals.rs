// src/system/signals.rs

//! Ctrl+C handling.

use crate::{CancellationToken, constants::EXIT_INTERRUPTED};
use colored::Colorize;
use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

/// Listens for Ctrl+C on a background thread and raises `token` when it arrives.
///
/// The first interrupt asks running environments to stop; their processes are killed
/// by the executor and a partial report is still printed. A second interrupt exits
/// the process immediately.
pub fn install_interrupt_handler(token: &CancellationToken) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let token = Arc::clone(token);

    thread::Builder::new()
        .name("envmatrix-signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        log::warn!("Could not listen for Ctrl+C: {}", e);
                        return;
                    }
                    if token.swap(true, Ordering::SeqCst) {
                        eprintln!("\n{}", "Interrupted again, exiting.".red());
                        std::process::exit(EXIT_INTERRUPTED);
                    }
                    eprintln!(
                        "\n{}",
                        "Interrupted: stopping running environments (press Ctrl+C again to force)."
                            .yellow()
                    );
                }
            });
        })?;
    Ok(())
}
