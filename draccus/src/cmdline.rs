use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use draccus_core::Result;
use draccus_core::config::Options;

const DEFAULT_FILL_BATCHES: usize = 10;

/// What to do, with the options file already merged under the command line flags.
#[derive(Debug)]
pub(super) enum Invocation {
    Drain(Options),
    FillQueue { options: Options, batches: usize },
    Replay(Options),
}

impl Invocation {
    pub(super) fn options(&self) -> &Options {
        match self {
            Invocation::Drain(options)
            | Invocation::FillQueue { options, .. }
            | Invocation::Replay(options) => options,
        }
    }
}

pub(super) fn root_cli() -> Command {
    Command::new("draccus")
        .about("Drains an SQS queue into files, an S3 bucket or the console")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(add_drain_subcommand())
        .subcommand(add_fill_queue_subcommand())
        .subcommand(add_replay_subcommand())
}

fn add_drain_subcommand() -> Command {
    Command::new("drain")
        .about("Receive messages and write them in batches, deleting them once written")
        .args(queue_args())
        .arg(
            Arg::new("s3-bucket")
                .long("s3-bucket")
                .help("S3 bucket the batches are written to"),
        )
        .arg(
            Arg::new("out-dir")
                .long("out-dir")
                .value_parser(value_parser!(PathBuf))
                .help("Local directory the batches are written to"),
        )
        .arg(
            Arg::new("stdout")
                .long("stdout")
                .action(ArgAction::SetTrue)
                .help("Write the batches to the console"),
        )
        .arg(
            Arg::new("flush-frequency")
                .long("flush-frequency")
                .value_parser(value_parser!(u64))
                .help("How often pending messages are written, in seconds [default: 60]"),
        )
        .arg(
            Arg::new("filename-pattern")
                .long("filename-pattern")
                .help("strftime pattern for the batch names, PID is replaced by the process id [default: %s]"),
        )
        .arg(
            Arg::new("daemon")
                .long("daemon")
                .action(ArgAction::SetTrue)
                .help("Keep running once the queue is empty and wait for further messages"),
        )
        .arg(
            Arg::new("log-raw-message")
                .long("log-raw-message")
                .action(ArgAction::SetTrue)
                .help("Store the whole received message as JSON instead of its body"),
        )
        .arg(
            Arg::new("max-concurrent-receivers")
                .long("max-concurrent-receivers")
                .value_parser(value_parser!(usize))
                .help("Number of polling loops [default: 1]"),
        )
}

fn add_fill_queue_subcommand() -> Command {
    Command::new("fill-queue")
        .about("Send batches of 10 synthetic messages to the queue, for testing")
        .args(queue_args())
        .arg(
            Arg::new("batches")
                .long("batches")
                .value_parser(value_parser!(usize))
                .default_value("10")
                .help("How many batches of 10 messages to send"),
        )
}

fn add_replay_subcommand() -> Command {
    Command::new("replay")
        .about("Send every line read from stdin to the queue as a message")
        .args(queue_args())
}

/// Flags every subcommand shares.
fn queue_args() -> Vec<Arg> {
    vec![
        Arg::new("options-file")
            .long("options-file")
            .value_parser(value_parser!(PathBuf))
            .help("JSON file with options, overridden by the flags"),
        Arg::new("access-key-id")
            .long("access-key-id")
            .help("AWS access key id"),
        Arg::new("secret-access-key")
            .long("secret-access-key")
            .help("AWS secret access key"),
        Arg::new("region")
            .long("region")
            .help("AWS region of the queue"),
        Arg::new("endpoint-url")
            .long("endpoint-url")
            .help("Custom AWS endpoint, e.g. a local emulator"),
        Arg::new("queue-name")
            .long("queue-name")
            .help("Name of the SQS queue"),
        Arg::new("log-file")
            .long("log-file")
            .value_parser(value_parser!(PathBuf))
            .help("Append logs to this file instead of stdout"),
    ]
}

pub(super) fn parse(matches: &ArgMatches) -> Result<Invocation> {
    let Some((command, args)) = matches.subcommand() else {
        return Err(draccus_core::Error::Config("a subcommand is required".to_string()));
    };

    let options = match args.get_one::<PathBuf>("options-file") {
        Some(path) => Options::load(path)?,
        None => Options::default(),
    }
    .merge(overrides(args));

    match command {
        "drain" => Ok(Invocation::Drain(options)),
        "fill-queue" => Ok(Invocation::FillQueue {
            options,
            batches: args
                .get_one::<usize>("batches")
                .copied()
                .unwrap_or(DEFAULT_FILL_BATCHES),
        }),
        "replay" => Ok(Invocation::Replay(options)),
        other => Err(draccus_core::Error::Config(format!(
            "unknown subcommand {other}"
        ))),
    }
}

/// Options given on the command line. Flags a subcommand does not define stay unset.
fn overrides(args: &ArgMatches) -> Options {
    Options {
        region: string(args, "region"),
        access_key_id: string(args, "access-key-id"),
        secret_access_key: string(args, "secret-access-key"),
        endpoint_url: string(args, "endpoint-url"),
        queue_name: string(args, "queue-name"),
        s3_bucket: string(args, "s3-bucket"),
        out_dir: value::<PathBuf>(args, "out-dir"),
        stdout: flag(args, "stdout"),
        flush_frequency: value::<u64>(args, "flush-frequency"),
        filename_pattern: string(args, "filename-pattern"),
        log_file: value::<PathBuf>(args, "log-file"),
        log_raw_message: flag(args, "log-raw-message"),
        max_concurrent_receivers: value::<usize>(args, "max-concurrent-receivers"),
        daemon: flag(args, "daemon"),
    }
}

fn value<T: Clone + Send + Sync + 'static>(args: &ArgMatches, id: &str) -> Option<T> {
    args.try_get_one::<T>(id).ok().flatten().cloned()
}

fn string(args: &ArgMatches, id: &str) -> Option<String> {
    value::<String>(args, id)
}

/// `Some(true)` when given, so an unset flag never overrides the options file.
fn flag(args: &ArgMatches, id: &str) -> Option<bool> {
    value::<bool>(args, id).filter(|set| *set)
}
