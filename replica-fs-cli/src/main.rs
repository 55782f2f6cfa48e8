mod cli;

use block_dev::{BlockDevice, FaultyBlockDevice};
use clap::Parser;
use replica_fs::{Error, FileStore};

use self::cli::{Cli, Command, RunArgs};

fn main() -> Result<(), Error> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo => {
            demo();
            Ok(())
        }
        Command::Run(args) => run(&args),
    }
}

/// Replays the raw device walkthrough: truncation, short writes and corruption.
fn demo() {
    let dev = FaultyBlockDevice::new(1024, 8, 0.0);
    println!("Writing '12345678' to the block device: {}", write(&dev, "12345678"));
    println!("Reading from the block device: {}", read(&dev));
    // Content longer than a block is truncated
    println!("Writing '123456789' to the block device: {}", write(&dev, "123456789"));
    // Shorter content keeps the tail of the old block
    println!("Writing 'abcd' to the block device: {}", write(&dev, "abcd"));

    let dev = FaultyBlockDevice::new(1024, 8, 1.0);
    println!(
        "Writing '12345678' to the corrupting block device: {}",
        write(&dev, "12345678")
    );
    dev.set_corruption_rate(0.0);
    println!(
        "Writing '1234abcd' to the corrupting block device: {}",
        write(&dev, "1234abcd")
    );
    println!("Reading (no corruption): {}", read(&dev));
    dev.set_corruption_rate(1.0);
    println!("Reading (corrupts): {}", read(&dev));
    dev.set_corruption_rate(0.0);
    println!("Reading (original data lost): {}", read(&dev));

    println!("Success!");
}

fn run(args: &RunArgs) -> Result<(), Error> {
    let store = FileStore::new(args.config())?;
    log::info!("store={store:?}");

    for (name, content) in &args.puts {
        match store.put(name, content) {
            Ok(stored) => println!("put {name:?}: {stored:?}"),
            Err(err) => println!("put {name:?} failed: {err}"),
        }
    }

    for name in &args.gets {
        match store.get(name) {
            Ok(content) => println!("get {name:?}: {content:?}"),
            Err(Error::FileCorrupted { partial, .. }) => {
                println!("get {name:?}: corrupted, recovered {partial:?}")
            }
            Err(err) => println!("get {name:?} failed: {err}"),
        }
    }

    for name in &args.deletes {
        match store.delete(name) {
            Ok(()) => println!("delete {name:?}"),
            Err(err) => println!("delete {name:?} failed: {err}"),
        }
    }

    println!("free space: {} bytes", store.free_space());
    println!("{:?}", store.stats());
    Ok(())
}

fn write(dev: &impl BlockDevice, content: &str) -> String {
    let mut stored = vec![0; dev.block_size()];
    dev.write_block(0, content.as_bytes(), &mut stored);
    String::from_utf8_lossy(&stored).into_owned()
}

fn read(dev: &impl BlockDevice) -> String {
    let mut buf = vec![0; dev.block_size()];
    dev.read_block(0, &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}
