use std::{
    error::Error,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::{Parser, Subcommand};
use ilp_client::{
    Sender,
    cli::{Command, prompt},
    protocol::{TimeUnit, now_nanos},
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Sender configuration, e.g. `http::addr=localhost:9000;`
    #[arg(long, env = "QDB_CLIENT_CONF")]
    conf: String,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Read rows from stdin, one per line; `.flush` and `.exit` are commands
    Shell,
    /// Send synthetic rows
    Populate {
        /// Target table
        #[arg(long, default_value = "ilp_cli_populate")]
        table: String,
        /// Number of rows to send
        #[arg(long, default_value_t = 1_000)]
        rows: u64,
        /// Rows per explicit flush
        #[arg(long, default_value_t = 100)]
        batch: u64,
    },
}

fn shell(sender: &mut Sender, stop: &AtomicBool) -> Result<(), Box<dyn Error>> {
    let stdin = io::stdin();
    let stdout = io::stdout();

    while !stop.load(Ordering::Relaxed) {
        let cmd = match prompt(stdin.lock(), stdout.lock()) {
            Ok(Some(c)) => c,
            Ok(None) => break,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };

        match cmd {
            Command::Exit => break,
            Command::Flush => match sender.flush() {
                Ok(()) => println!("flushed"),
                Err(e) => eprintln!("flush error: {e}"),
            },
            Command::Row(row) => {
                if let Err(e) = row.write_to(sender) {
                    eprintln!("row error: {e}");
                }
            }
        }
    }
    Ok(())
}

fn populate(
    sender: &mut Sender,
    stop: &AtomicBool,
    table: &str,
    rows: u64,
    batch: u64,
) -> Result<(), Box<dyn Error>> {
    let batch = batch.max(1);
    for seq in 0..rows {
        if stop.load(Ordering::Relaxed) {
            log::info!("interrupted after {seq} rows");
            break;
        }
        sender
            .table(table)?
            .symbol("source", "ilp_cli")?
            .column_i64("seq", seq as i64)?
            .column_f64("value", rand::random::<f64>())?
            .at(now_nanos(), TimeUnit::Nanos)?;
        if (seq + 1) % batch == 0 {
            sender.flush()?;
        }
    }
    sender.flush()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::Relaxed))?;

    let mut sender = Sender::from_conf(&cli.conf)?;
    let result = match cli.mode {
        Mode::Shell => shell(&mut sender, &stop),
        Mode::Populate { table, rows, batch } => populate(&mut sender, &stop, &table, rows, batch),
    };
    sender.close()?;
    result
}
