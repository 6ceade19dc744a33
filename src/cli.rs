use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Build version with codec info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Share:  msgpack + base64, ", crate::share::SHARE_LIMIT, " byte limit\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Scene graph event store and playback tools
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging to file (default: vuer.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE", global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pack a JSON or YAML scene into a share payload
    Pack {
        /// Scene file (.json, .yml, .yaml)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Print a full share URL on this base instead of the bare payload
        #[arg(short = 'u', long = "base-url", value_name = "URL")]
        base_url: Option<String>,

        /// Skip the share size limit
        #[arg(short = 'f', long = "force")]
        force: bool,
    },

    /// Decode a share payload, URL or query string and print the scene as JSON
    Unpack {
        #[arg(value_name = "QUERY|PAYLOAD")]
        input: String,
    },

    /// Record server events into a playback buffer and replay them
    Replay {
        /// Event log: a JSON array or one JSON object per line
        #[arg(value_name = "EVENTS")]
        events: PathBuf,

        /// Playback frame rate (default: stored setting)
        #[arg(long = "fps", value_name = "FPS")]
        fps: Option<f64>,

        /// Frame buffer capacity (default: stored setting)
        #[arg(long = "maxlen", value_name = "N")]
        maxlen: Option<usize>,

        /// Wrap around at the end of the range
        #[arg(short = 'o', long = "loop")]
        loop_playback: bool,
    },
}
