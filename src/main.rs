use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use tbl_sort::{ExternalChunk, ExternalSorterBuilder, RmpExternalChunk, RowFormat, TextExternalChunk};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let input = arg_parser.value_of("input").expect("value is required");
    let output = arg_parser.value_of("output").expect("value is required");
    let key_column: usize = arg_parser.value_of_t_or_exit("key");
    let columns: usize = arg_parser.value_of_t_or_exit("columns");
    let delimiter: char = arg_parser.value_of_t_or_exit("delimiter");
    let buffer_size: ByteSize = arg_parser.value_of_t_or_exit("buffer_size");
    let memory_size: ByteSize = arg_parser.value_of_t_or_exit("memory_size");
    let spill_format: SpillFormat = arg_parser.value_of_t_or_exit("spill_format");
    let record_size: Option<ByteSize> = arg_parser
        .is_present("record_size")
        .then(|| arg_parser.value_of_t_or_exit("record_size"));
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");

    if key_column >= columns {
        log::error!("key column {} is out of range, the table has {} columns", key_column, columns);
        process::exit(1);
    }
    if buffer_size.as_u64() == 0 || buffer_size > memory_size {
        log::error!(
            "buffer size must be positive and not greater than memory size (buffer: {}, memory: {})",
            buffer_size,
            memory_size
        );
        process::exit(1);
    }

    let format = RowFormat::new(delimiter, columns).with_trailing_delimiter(arg_parser.is_present("trailing_delimiter"));
    let options = SortOptions {
        input: path::Path::new(input),
        output: path::Path::new(output),
        key_column,
        buffer_size: buffer_size.as_u64(),
        memory_size: memory_size.as_u64(),
        record_size: record_size.map(|size| size.as_u64()),
        threads,
        tmp_dir: tmp_dir.map(path::Path::new),
    };

    match spill_format {
        SpillFormat::Text => run::<TextExternalChunk>(format, &options),
        SpillFormat::Msgpack => run::<RmpExternalChunk>(format, &options),
    }
}

struct SortOptions<'a> {
    input: &'a path::Path,
    output: &'a path::Path,
    key_column: usize,
    buffer_size: u64,
    memory_size: u64,
    record_size: Option<u64>,
    threads: Option<usize>,
    tmp_dir: Option<&'a path::Path>,
}

fn run<C: ExternalChunk>(format: RowFormat, options: &SortOptions) {
    let mut sorter_builder = ExternalSorterBuilder::<C>::new(format);
    if let Some(threads) = options.threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = options.tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(tmp_dir);
    }

    if let Some(record_size) = options.record_size {
        sorter_builder = sorter_builder.with_record_size_estimate(record_size);
    }

    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = sorter.external_sort(
        options.input,
        options.output,
        options.key_column,
        options.buffer_size,
        options.memory_size,
    ) {
        log::error!("data sorting error: {}", err);
        process::exit(1);
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum SpillFormat {
    Text,
    Msgpack,
}

impl SpillFormat {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        SpillFormat::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for SpillFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <SpillFormat as clap::ArgEnum>::from_str(s, false)
    }
}

fn validate_size(v: &str) -> Result<(), String> {
    match v.parse::<ByteSize>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("size format incorrect: {}", err)),
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("tbl-sort")
        .about("external sorter of delimited table files")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("table file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("key")
                .short('k')
                .long("key")
                .help("0-based index of the column to sort by")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("columns")
                .short('n')
                .long("columns")
                .help("number of columns in every row")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("delimiter")
                .short('D')
                .long("delimiter")
                .help("field delimiter")
                .takes_value(true)
                .default_value("|"),
        )
        .arg(
            clap::Arg::new("trailing_delimiter")
                .long("trailing-delimiter")
                .help("terminate every output row with the delimiter, as native .tbl files do"),
        )
        .arg(
            clap::Arg::new("buffer_size")
                .short('b')
                .long("buffer")
                .help("memory budget of one chunk, e.g. 64MiB")
                .required(true)
                .takes_value(true)
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("memory_size")
                .short('m')
                .long("memory")
                .help("total memory budget, not less than the buffer size")
                .required(true)
                .takes_value(true)
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("record_size")
                .short('r')
                .long("record-size")
                .help("estimated in-memory size of one row")
                .takes_value(true)
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("spill_format")
                .short('f')
                .long("spill-format")
                .help("chunk files format")
                .takes_value(true)
                .default_value("text")
                .possible_values(SpillFormat::possible_values()),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store chunk files")
                .takes_value(true),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
