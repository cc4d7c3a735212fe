use clap::Parser;
use std::path::PathBuf;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "visitor-board")]
#[command(about = "Real-time counter, clock and visitor log over WebSockets")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    // Directory with the client files, served as-is
    #[arg(short, long, default_value = "public")]
    pub static_dir: PathBuf,

    // SQLite file holding the visitor log
    #[arg(short, long, default_value = "visitors.db")]
    pub database: PathBuf,

    // Keep the visitor log in memory only (ignores --database)
    #[arg(long, default_value_t = false)]
    pub memory: bool,

    // Number of slots in the rotating visitor log
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub capacity: u64,

    // Outbound messages queued per client before dropping
    #[arg(long, default_value_t = 64)]
    pub send_queue: usize,
}
