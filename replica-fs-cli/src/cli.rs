use clap::{Args, Parser, Subcommand};
use replica_fs::{
    Repair, RepairPolicy, StoreConfig, DEFAULT_BLOCK_COUNT, DEFAULT_BLOCK_SIZE,
    DEFAULT_WRITE_ATTEMPTS,
};

#[derive(Parser)]
#[command(about = "Resilient file store on an unreliable block device")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Walk through the behaviour of the raw block device
    Demo,
    /// Run a scripted session against a fresh file store
    Run(RunArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Number of blocks on the device
    #[arg(long, default_value_t = DEFAULT_BLOCK_COUNT)]
    pub blocks: usize,

    /// Bytes per block, one of which is reserved
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    /// Probability that a read or write corrupts its block
    #[arg(long, short, default_value_t = 0.0)]
    pub corruption_rate: f64,

    /// Copies kept of every chunk
    #[arg(long, short, default_value_t = 1)]
    pub replicas: usize,

    /// Attempts per block write before giving up
    #[arg(long, default_value_t = DEFAULT_WRITE_ATTEMPTS)]
    pub attempts: usize,

    /// Seed of the device's fault source
    #[arg(long)]
    pub seed: Option<u64>,

    /// Do not rewrite diverging copies while reading
    #[arg(long)]
    pub no_heal: bool,

    /// Delete files found to be unrecoverable
    #[arg(long)]
    pub drop_corrupted: bool,

    /// Clear the blocks of deleted files
    #[arg(long)]
    pub scrub: bool,

    /// Store a file, given as `name=content`
    #[arg(long = "put", value_name = "NAME=CONTENT", value_parser = parse_put)]
    pub puts: Vec<(String, String)>,

    /// Read a file back after all puts
    #[arg(long = "get", value_name = "NAME")]
    pub gets: Vec<String>,

    /// Delete a file after all gets
    #[arg(long = "delete", value_name = "NAME")]
    pub deletes: Vec<String>,
}

impl RunArgs {
    pub fn config(&self) -> StoreConfig {
        let mut policy = RepairPolicy::empty();
        policy.set(Repair::HealOnRead, !self.no_heal);
        policy.set(Repair::DropCorrupted, self.drop_corrupted);
        policy.set(Repair::ScrubOnDelete, self.scrub);

        StoreConfig {
            block_count: self.blocks,
            block_size: self.block_size,
            corruption_rate: self.corruption_rate,
            replicas: self.replicas,
            max_write_attempts: self.attempts,
            policy,
            seed: self.seed,
        }
    }
}

fn parse_put(arg: &str) -> Result<(String, String), String> {
    arg.split_once('=')
        .map(|(name, content)| (name.to_owned(), content.to_owned()))
        .ok_or_else(|| format!("expected `name=content`, got {arg:?}"))
}
