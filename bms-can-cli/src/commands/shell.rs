//! `bms` subcommand: the interactive request shell
//!
//! A dedicated thread owns the line editor and forwards input lines over a
//! channel. The main thread waits on that channel and on a ticker that
//! drives [`Controller::tick`].

use anyhow::Result;
use crossbeam_channel::{bounded, select, tick, Receiver};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bms_can::bus::SystemBusOpener;
use bms_can::shell::{Console, Controller, Flow};
use bms_can::ShellConfig;

const PROMPT: &str = "bms> ";
const HISTORY_FILE: &str = ".bms_history";
const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Event from the input thread
#[derive(Debug)]
enum Input {
    Line(String),
    /// Ctrl-C at the prompt
    Interrupt,
}

fn spawn_input() -> Receiver<Input> {
    let (tx, rx) = bounded::<Input>(16);

    let spawned = thread::Builder::new()
        .name("bms-input".to_string())
        .spawn(move || {
            let mut editor = match DefaultEditor::new() {
                Ok(editor) => editor,
                Err(e) => {
                    log::error!("Could not initialize the line editor: {}", e);
                    return;
                }
            };
            let _ = editor.load_history(HISTORY_FILE);

            loop {
                match editor.readline(PROMPT) {
                    Ok(line) => {
                        if !line.trim().is_empty() {
                            let _ = editor.add_history_entry(line.as_str());
                        }
                        if tx.send(Input::Line(line)).is_err() {
                            break;
                        }
                    }
                    Err(ReadlineError::Interrupted) => {
                        if tx.send(Input::Interrupt).is_err() {
                            break;
                        }
                    }
                    Err(ReadlineError::Eof) => break,
                    Err(e) => {
                        log::error!("Input error: {}", e);
                        break;
                    }
                }
            }
            if let Err(e) = editor.save_history(HISTORY_FILE) {
                log::debug!("Could not save history: {}", e);
            }
        });
    if let Err(e) = spawned {
        log::error!("Could not start the input thread: {}", e);
    }
    rx
}

pub fn run(config_path: &Path) -> Result<()> {
    log::info!("Loading shell configuration: {:?}", config_path);
    let config = ShellConfig::load(config_path)?;
    let mut controller = Controller::from_config(
        &config,
        Arc::new(SystemBusOpener::new()),
        Console::stdio(),
    )?;

    println!("BMS request shell v{}", bms_can::VERSION);
    println!("Enter HELP for the list of commands, EXIT to leave.");

    let input = spawn_input();
    let ticker = tick(TICK_INTERVAL);
    loop {
        let flow = select! {
            recv(input) -> event => match event {
                Ok(Input::Line(line)) => controller.handle_line(&line),
                Ok(Input::Interrupt) => controller.handle_line("exit"),
                Err(_) => {
                    controller.shutdown();
                    Flow::Quit
                }
            },
            recv(ticker) -> _ => {
                controller.tick();
                Flow::Continue
            }
        };
        if flow == Flow::Quit {
            break;
        }
    }
    Ok(())
}
